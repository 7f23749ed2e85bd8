//! Target Resolver - CIDR expansion and DNS resolution
//!
//! Takes comma-separated target strings (or a target file) and expands them
//! into a deduplicated list of host addresses, in first-seen order. Supported
//! token forms:
//! - single address: "1.2.3.4", "2001:db8::1"
//! - CIDR: "192.168.1.0/24", "2001:db8::/120"
//! - IPv4 range: "192.168.1.1-192.168.1.10" or "192.168.1.1-10"
//! - hostname: "example.com"
//!
//! A malformed token is an `InvalidTarget` for that token only; the rest of
//! the input is still expanded.

use anyhow::{Context, Result};
use astra_common::{AstraError, AstraResult};
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;

/// Hosts a single CIDR may expand to unless `ASTRA_ALLOW_LARGE_CIDR=1`.
const MAX_HOSTS: u128 = 4096;

/// One token after literal parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    Hosts(Vec<IpAddr>),
    Hostname(String),
}

/// Literal expansion of a batch of tokens, before any DNS lookups.
#[derive(Debug, Default)]
pub struct Expanded {
    pub hosts: Vec<IpAddr>,
    pub hostnames: Vec<String>,
    pub errors: Vec<AstraError>,
}

pub struct TargetResolver;

impl TargetResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a comma-separated target string into unique host addresses.
    pub async fn resolve_targets(targets: &str) -> Result<Vec<IpAddr>> {
        Self::resolve_tokens(targets.split(',')).await
    }

    /// Resolve every token, looking hostnames up through the system resolver.
    pub async fn resolve_tokens<'a, I>(tokens: I) -> Result<Vec<IpAddr>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let expanded = expand_literals(tokens);
        for err in &expanded.errors {
            warn!(error = %err, "skipping target");
        }

        let mut seen: HashSet<IpAddr> = expanded.hosts.iter().copied().collect();
        let mut hosts = expanded.hosts;

        if !expanded.hostnames.is_empty() {
            let resolver = TokioAsyncResolver::tokio_from_system_conf()
                .context("Failed to initialise DNS resolver")?;
            for name in &expanded.hostnames {
                match resolver.lookup_ip(name.as_str()).await {
                    Ok(lookup) => {
                        let before = hosts.len();
                        for ip in lookup.iter() {
                            if seen.insert(ip) {
                                hosts.push(ip);
                            }
                        }
                        debug!(host = %name, added = hosts.len() - before, "resolved hostname");
                    }
                    Err(e) => {
                        let err = AstraError::InvalidTarget(format!("{name}: {e}"));
                        warn!(error = %err, "skipping target");
                    }
                }
            }
        }

        if hosts.is_empty() {
            anyhow::bail!("No valid hosts found in targets");
        }
        Ok(hosts)
    }

    /// Read target tokens from a file: one or more comma-separated tokens per
    /// line, `#` starts a comment.
    pub async fn read_target_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read target file {}", path.display()))?;
        Ok(parse_target_lines(&content))
    }
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_target_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .flat_map(|line| line.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Expand all literal tokens, deduplicating hosts and collecting per-token errors.
pub fn expand_literals<'a, I>(tokens: I) -> Expanded
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Expanded::default();
    let mut seen = HashSet::new();
    let mut seen_names = HashSet::new();

    for token in tokens {
        let t = token.trim();
        if t.is_empty() {
            continue;
        }
        match expand_token(t) {
            Ok(Expansion::Hosts(ips)) => {
                for ip in ips {
                    if seen.insert(ip) {
                        out.hosts.push(ip);
                    }
                }
            }
            Ok(Expansion::Hostname(name)) => {
                if seen_names.insert(name.clone()) {
                    out.hostnames.push(name);
                }
            }
            Err(e) => out.errors.push(e),
        }
    }
    out
}

/// Classify and expand a single token.
pub fn expand_token(token: &str) -> AstraResult<Expansion> {
    if let Ok(ip) = token.parse::<IpAddr>() {
        return Ok(Expansion::Hosts(vec![ip]));
    }

    if token.contains('/') {
        let net: IpNet = token
            .parse()
            .map_err(|e| AstraError::InvalidTarget(format!("{token}: {e}")))?;
        return expand_cidr(net).map(Expansion::Hosts);
    }

    if token.contains('-') && token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return parse_ip_range(token).map(Expansion::Hosts);
    }

    if is_hostname(token) {
        return Ok(Expansion::Hostname(token.to_ascii_lowercase()));
    }

    Err(AstraError::InvalidTarget(token.to_string()))
}

fn expand_cidr(net: IpNet) -> AstraResult<Vec<IpAddr>> {
    let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    let hosts_count = if host_bits >= 127 {
        u128::MAX
    } else {
        1u128 << host_bits
    };
    let allow_large = std::env::var("ASTRA_ALLOW_LARGE_CIDR")
        .map(|v| v == "1")
        .unwrap_or(false);
    if hosts_count > MAX_HOSTS && !allow_large {
        return Err(AstraError::InvalidTarget(format!(
            "CIDR {net} expands to {hosts_count} hosts which exceeds the allowed limit of {MAX_HOSTS}. Set ASTRA_ALLOW_LARGE_CIDR=1 to override."
        )));
    }
    Ok(net.hosts().collect())
}

fn parse_ip_range(range: &str) -> AstraResult<Vec<IpAddr>> {
    let invalid = || AstraError::InvalidTarget(format!("Invalid IP range: {range}"));
    let (start, end) = range.split_once('-').ok_or_else(invalid)?;

    let start: Ipv4Addr = start.trim().parse().map_err(|_| invalid())?;
    let end = end.trim();
    // "10.0.0.1-20" shorthand replaces the last octet
    let end: Ipv4Addr = match end.parse::<u8>() {
        Ok(last) => {
            let [a, b, c, _] = start.octets();
            Ipv4Addr::new(a, b, c, last)
        }
        Err(_) => end.parse().map_err(|_| invalid())?,
    };

    let start_u32 = u32::from(start);
    let end_u32 = u32::from(end);
    if start_u32 > end_u32 {
        return Err(AstraError::InvalidTarget(format!(
            "Invalid IP range: start > end in {range}"
        )));
    }
    if u128::from(end_u32 - start_u32) + 1 > MAX_HOSTS {
        return Err(AstraError::InvalidTarget(format!(
            "Range {range} exceeds the allowed limit of {MAX_HOSTS} hosts"
        )));
    }

    Ok((start_u32..=end_u32)
        .map(|v| IpAddr::V4(Ipv4Addr::from(v)))
        .collect())
}

fn is_hostname(token: &str) -> bool {
    token.len() <= 253
        && token.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && token.chars().any(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[tokio::test]
    async fn test_resolve_single_ip() {
        let ips = TargetResolver::resolve_targets("8.8.8.8").await.unwrap();
        assert_eq!(ips, vec![v4(8, 8, 8, 8)]);
    }

    #[tokio::test]
    async fn test_resolve_ipv6_literal() {
        let ips = TargetResolver::resolve_targets("2001:db8::1").await.unwrap();
        assert_eq!(ips, vec!["2001:db8::1".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_resolve_cidr() {
        let ips = TargetResolver::resolve_targets("192.168.1.0/30").await.unwrap();
        assert_eq!(ips, vec![v4(192, 168, 1, 1), v4(192, 168, 1, 2)]);
    }

    #[tokio::test]
    async fn test_resolve_range() {
        let ips = TargetResolver::resolve_targets("192.168.1.1-192.168.1.3").await.unwrap();
        assert_eq!(ips.len(), 3);
        let short = TargetResolver::resolve_targets("192.168.1.1-3").await.unwrap();
        assert_eq!(ips, short);
    }

    #[tokio::test]
    async fn duplicate_hosts_expand_once() {
        let ips = TargetResolver::resolve_targets(
            "10.0.0.1, 10.0.0.1,10.0.0.0/30,10.0.0.2-10.0.0.3",
        )
        .await
        .unwrap();
        assert_eq!(ips, vec![v4(10, 0, 0, 1), v4(10, 0, 0, 2), v4(10, 0, 0, 3)]);
    }

    #[tokio::test]
    async fn invalid_token_does_not_abort_others() {
        let ips = TargetResolver::resolve_targets("10.0.0.300,10.0.0.9").await.unwrap();
        assert_eq!(ips, vec![v4(10, 0, 0, 9)]);
    }

    #[tokio::test]
    async fn all_invalid_is_an_error() {
        assert!(TargetResolver::resolve_targets("").await.is_err());
        assert!(TargetResolver::resolve_targets("10.0.0.5-10.0.0.1").await.is_err());
    }

    #[test]
    fn test_large_cidr_rejected() {
        std::env::remove_var("ASTRA_ALLOW_LARGE_CIDR");
        // /16 is 65536 hosts
        let r = expand_token("10.0.0.0/16");
        assert!(matches!(r, Err(AstraError::InvalidTarget(_))));
    }

    #[test]
    fn tokens_are_classified() {
        assert_eq!(
            expand_token("Example.COM").unwrap(),
            Expansion::Hostname("example.com".into())
        );
        assert!(expand_token("bad host!").is_err());
        assert!(expand_token("1.2.3").is_err());
    }

    #[test]
    fn literal_expansion_collects_errors() {
        let out = expand_literals(["10.0.0.1", "nope!", "host.local", "host.local"]);
        assert_eq!(out.hosts, vec![v4(10, 0, 0, 1)]);
        assert_eq!(out.hostnames, vec!["host.local".to_string()]);
        assert_eq!(out.errors.len(), 1);
    }

    #[tokio::test]
    async fn target_file_lines_and_comments() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# scope").unwrap();
        writeln!(file, "10.0.0.1, 10.0.0.2").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "10.0.0.3 # gateway").unwrap();

        let tokens = TargetResolver::read_target_file(file.path()).await.unwrap();
        assert_eq!(tokens, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }
}
