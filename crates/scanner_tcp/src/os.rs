//! Remote OS guess from the ICMP echo TTL reported by the system `ping`.

use anyhow::{bail, Context, Result};
use astra_common::OsDetector;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;
use tokio::process::Command;

static TTL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ttl[=:]\s*(\d+)").expect("static regex"));

pub struct PingOsDetector {
    timeout: Duration,
}

impl PingOsDetector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PingOsDetector {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Map an observed TTL to the usual initial-TTL families.
#[must_use]
pub fn os_from_ttl(ttl: u8) -> &'static str {
    match ttl {
        0..=64 => "linux",
        65..=128 => "windows",
        _ => "network-device",
    }
}

fn parse_ttl(output: &str) -> Option<u8> {
    TTL_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[async_trait]
impl OsDetector for PingOsDetector {
    async fn detect(&self, ip: IpAddr) -> Result<String> {
        let wait = self.timeout.as_secs().max(1).to_string();
        let output = Command::new("ping")
            .args(["-c", "1", "-W", &wait])
            .arg(ip.to_string())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout + Duration::from_secs(1), output)
            .await
            .context("ping timed out")?
            .context("failed to run ping")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_ttl(&stdout) {
            Some(ttl) => Ok(os_from_ttl(ttl).to_string()),
            None => bail!("no echo reply from {ip}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_families() {
        assert_eq!(os_from_ttl(52), "linux");
        assert_eq!(os_from_ttl(64), "linux");
        assert_eq!(os_from_ttl(117), "windows");
        assert_eq!(os_from_ttl(250), "network-device");
    }

    #[test]
    fn ttl_is_parsed_from_ping_output() {
        let out = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=63 time=0.41 ms";
        assert_eq!(parse_ttl(out), Some(63));
        assert_eq!(parse_ttl("Reply from 10.0.0.2: bytes=32 time<1ms TTL=128"), Some(128));
        assert_eq!(parse_ttl("100% packet loss"), None);
    }
}
