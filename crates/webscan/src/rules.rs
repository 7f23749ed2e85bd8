//! Keyword finger rules.
//!
//! A rule matches when every keyword occurs (case-insensitively) in the
//! response headers, title or body. Rules are loaded once at startup from a
//! JSON array of `{name, keywords, poc_tags}`.

use astra_common::{AstraError, AstraResult, Finger};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FingerRule {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub poc_tags: Vec<String>,
}

impl FingerRule {
    fn matches(&self, haystack: &str) -> bool {
        !self.keywords.is_empty()
            && self
                .keywords
                .iter()
                .all(|k| haystack.contains(&k.to_lowercase()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FingerRules {
    rules: Vec<FingerRule>,
}

impl FingerRules {
    pub fn new(rules: Vec<FingerRule>) -> Self {
        Self { rules }
    }

    /// A handful of common products, used when no rules file is configured.
    pub fn builtin() -> Self {
        let rule = |name: &str, keywords: &[&str], tags: &[&str]| FingerRule {
            name: name.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            poc_tags: tags.iter().map(|s| s.to_string()).collect(),
        };
        Self::new(vec![
            rule("Apache-Tomcat", &["apache tomcat"], &["tomcat"]),
            rule("Nginx", &["server: nginx"], &[]),
            rule("Apache-HTTPD", &["server: apache"], &[]),
            rule("Microsoft-IIS", &["server: microsoft-iis"], &[]),
            rule("Jenkins", &["x-jenkins"], &["jenkins"]),
            rule("Weblogic", &["weblogic"], &["weblogic"]),
            rule("Spring-Boot", &["whitelabel error page"], &["springboot"]),
            rule("Elasticsearch", &["lucene_version"], &["elasticsearch"]),
            rule("phpMyAdmin", &["phpmyadmin"], &["phpmyadmin"]),
            rule("Grafana", &["grafana"], &["grafana"]),
        ])
    }

    pub fn load(path: &Path) -> AstraResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AstraError::config_load(path.display().to_string(), e))?;
        let rules: Vec<FingerRule> = serde_json::from_str(&content)
            .map_err(|e| AstraError::config_load(path.display().to_string(), e))?;
        Ok(Self::new(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fingers whose keywords all occur in `haystack`.
    pub fn match_response(&self, haystack: &str) -> Vec<Finger> {
        let haystack = haystack.to_lowercase();
        self.rules
            .iter()
            .filter(|r| r.matches(&haystack))
            .map(|r| Finger {
                name: r.name.clone(),
                poc_tags: r.poc_tags.clone(),
            })
            .collect()
    }
}
