//! Coarse web-liveness probe for hosts whose open-port count is implausible.

use astra_common::{AstraResult, LivenessProber};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::scanner::build_client;

/// Fifty ports most commonly serving HTTP(S).
pub const TOP_WEB_PORTS: [u16; 50] = [
    80, 81, 82, 83, 84, 85, 88, 443, 444, 1080, 3000, 3001, 4443, 5000, 5001, 6443, 7001, 7002,
    7070, 7443, 7777, 8000, 8001, 8008, 8009, 8010, 8080, 8081, 8082, 8083, 8085, 8086, 8088,
    8089, 8090, 8161, 8181, 8443, 8444, 8800, 8880, 8888, 8899, 9000, 9001, 9080, 9090, 9200,
    9443, 10000,
];

/// Any HTTP response, whatever the status, counts as alive.
pub struct WebProbe {
    client: reqwest::Client,
    ports: Arc<[u16]>,
    threads: usize,
}

impl WebProbe {
    pub fn new(timeout: Duration, threads: usize, proxy: Option<&str>) -> AstraResult<Self> {
        Ok(Self {
            client: build_client(timeout, proxy)?,
            ports: Arc::from(&TOP_WEB_PORTS[..]),
            threads: threads.max(1),
        })
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports.into();
        self
    }

    async fn answers(client: &reqwest::Client, host: IpAddr, port: u16) -> bool {
        let host = match host {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{ip}]"),
        };
        for scheme in ["http", "https"] {
            let url = format!("{scheme}://{host}:{port}");
            if client.get(&url).send().await.is_ok() {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl LivenessProber for WebProbe {
    async fn live_ports(&self, host: IpAddr) -> Vec<u16> {
        let permits = Arc::new(Semaphore::new(self.threads));
        let mut set = JoinSet::new();
        for &port in self.ports.iter() {
            let client = self.client.clone();
            let permits = permits.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                Self::answers(&client, host, port).await.then_some(port)
            });
        }

        let mut live = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(port)) = joined {
                live.push(port);
            }
        }
        live.sort_unstable();
        debug!(%host, live = live.len(), "liveness probe done");
        live
    }
}
