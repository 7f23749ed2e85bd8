//! HTTP web scanner: fetch, title, server header, finger rules.

use astra_common::{AstraError, AstraResult, WebResult, WebScanner, WebTarget};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::rules::FingerRules;

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

/// Body bytes kept for title extraction and rule matching.
const MAX_BODY: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct WebOptions {
    pub threads: usize,
    pub timeout: Duration,
    /// SOCKS5 `host:port`.
    pub proxy: Option<String>,
}

impl Default for WebOptions {
    fn default() -> Self {
        Self {
            threads: 25,
            timeout: Duration::from_secs(5),
            proxy: None,
        }
    }
}

/// HTTP client shared by the scanner and the liveness probe. Certificates are
/// not verified; scanned hosts rarely present valid ones.
pub(crate) fn build_client(timeout: Duration, proxy: Option<&str>) -> AstraResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent(concat!("astra/", env!("CARGO_PKG_VERSION")));
    if let Some(proxy) = proxy {
        let url = if proxy.contains("://") {
            proxy.to_string()
        } else {
            format!("socks5://{proxy}")
        };
        let proxy = reqwest::Proxy::all(&url).map_err(|e| AstraError::config_load("proxy", e))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| AstraError::config_load("http client", e))
}

pub(crate) fn extract_title(body: &str) -> String {
    TITLE_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

pub struct HttpWebScanner {
    client: reqwest::Client,
    rules: Arc<FingerRules>,
    threads: usize,
}

impl HttpWebScanner {
    pub fn new(options: &WebOptions, rules: FingerRules) -> AstraResult<Self> {
        Ok(Self {
            client: build_client(options.timeout, options.proxy.as_deref())?,
            rules: Arc::new(rules),
            threads: options.threads.max(1),
        })
    }

    /// Candidate URLs for a target: bare `host:port` tries http then https.
    fn candidates(target: &WebTarget) -> Vec<String> {
        if target.is_bare() {
            vec![format!("http://{target}"), format!("https://{target}")]
        } else {
            vec![target.to_string()]
        }
    }

    async fn fetch(client: &reqwest::Client, rules: &FingerRules, url: &str) -> Option<WebResult> {
        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(%url, error = %e, "web fetch failed");
                return None;
            }
        };

        let status = response.status().as_u16();
        let server = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mut haystack = String::new();
        for (name, value) in response.headers() {
            haystack.push_str(name.as_str());
            haystack.push_str(": ");
            haystack.push_str(&String::from_utf8_lossy(value.as_bytes()));
            haystack.push('\n');
        }

        let bytes = response.bytes().await.unwrap_or_default();
        let body = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY)]);
        let title = extract_title(&body);
        haystack.push_str(&body);

        Some(WebResult {
            url: url.to_string(),
            status: Some(status),
            title,
            server,
            fingers: rules.match_response(&haystack),
        })
    }

    async fn scan_one(
        client: reqwest::Client,
        rules: Arc<FingerRules>,
        target: WebTarget,
    ) -> Option<WebResult> {
        for url in Self::candidates(&target) {
            if let Some(result) = Self::fetch(&client, &rules, &url).await {
                return Some(result);
            }
        }
        None
    }
}

#[async_trait]
impl WebScanner for HttpWebScanner {
    /// Results for targets that answered, in completion order.
    #[instrument(skip_all, fields(targets = targets.len()))]
    async fn scan(&self, targets: &[WebTarget]) -> Vec<WebResult> {
        let permits = Arc::new(Semaphore::new(self.threads));
        let mut set = JoinSet::new();
        for target in targets.iter().cloned() {
            let client = self.client.clone();
            let rules = self.rules.clone();
            let permits = permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                Self::scan_one(client, rules, target).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => warn!("web scan task failed: {}", e),
            }
        }
        info!("Web scan: {}/{} targets answered", results.len(), targets.len());
        results
    }
}
