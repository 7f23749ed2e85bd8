//! Service detection based on port numbers and banners
//!
//! Banner evidence wins over port hints. A port hint alone yields a
//! low-confidence match.

use crate::probes::is_mongodb_reply;
use astra_common::ServiceMatch;
use once_cell::sync::Lazy;
use regex::Regex;

/// Confidence assigned to matches inferred from the port number only.
const PORT_HINT_CONFIDENCE: f32 = 0.5;

/// Detect service from port number (IANA assignments, nmap names)
pub fn detect_service_from_port(port: u16) -> Option<ServiceMatch> {
    let service = match port {
        // File transfer / remote shells
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",

        // Mail
        25 | 587 => "smtp",
        110 => "pop3",
        143 => "imap",

        // Web
        80 | 81 | 3000 | 5000 | 8000 | 8008 | 8080 | 8081 | 8888 | 9000 => "http",
        443 | 8443 | 9443 => "ssl",

        // Directory / Windows
        53 => "domain",
        135 => "msrpc",
        139 => "netbios-ssn",
        389 => "ldap",
        445 => "microsoft-ds",
        3389 => "ms-wbt-server",
        5985 => "wsman",

        // Databases
        1433 => "ms-sql-s",
        1521 => "oracle-tns",
        3306 => "mysql",
        5432 => "postgresql",
        6379 => "redis",
        9200 => "elasticsearch",
        11211 => "memcached",
        27017 | 27018 => "mongodb",

        // Remote desktop / misc
        5900 => "vnc",
        2375 => "docker",
        5672 => "amqp",
        1883 => "mqtt",
        _ => return None,
    };

    Some(ServiceMatch::new(service).with_confidence(PORT_HINT_CONFIDENCE))
}

/// Detect service from a raw banner with version extraction
pub fn detect_service_from_banner(banner: &[u8], port: u16) -> Option<ServiceMatch> {
    if banner.is_empty() {
        return None;
    }

    // TLS record header: handshake (0x16) or alert (0x15), major version 3
    if banner.len() >= 3 && (banner[0] == 0x16 || banner[0] == 0x15) && banner[1] == 0x03 {
        return Some(ServiceMatch::new("ssl"));
    }

    // DCE/RPC v5 connection-oriented PDU (bind_ack, bind_nak, fault)
    if banner.len() >= 16
        && banner[0] == 5
        && banner[1] == 0
        && matches!(banner[2], 3 | 12 | 13)
    {
        return Some(ServiceMatch::new("msrpc"));
    }

    if is_mongodb_reply(banner) {
        let text = String::from_utf8_lossy(banner).to_lowercase();
        let mut svc = ServiceMatch::new("mongodb").with_product("MongoDB".to_string());
        if let Some(v) = extract_mongodb_version(&text) {
            svc = svc.with_version(v);
        }
        return Some(svc);
    }

    // ASCII folding keeps byte offsets aligned with `text`
    let text = String::from_utf8_lossy(banner);
    let lower = text.to_ascii_lowercase();

    if lower.starts_with("http/") {
        let (product, version) = extract_http_info(&text);
        // plaintext request on a TLS-only port answered with a 400 "plain HTTP" page
        let service = if lower.contains("plain http request was sent to https") {
            "ssl"
        } else {
            "http"
        };
        return Some(with_info(ServiceMatch::new(service), product, version));
    }

    if lower.starts_with("ssh-") {
        let (product, version) = extract_ssh_info(&text);
        return Some(with_info(ServiceMatch::new("ssh"), product, version));
    }

    if lower.starts_with("220") && lower.contains("ftp") {
        let (product, version) =
            extract_after_keyword(&text, &["proftpd", "vsftpd", "pure-ftpd", "filezilla"]);
        return Some(with_info(ServiceMatch::new("ftp"), product, version));
    }

    if lower.starts_with("220") && (lower.contains("smtp") || lower.contains("mail")) {
        let (product, version) =
            extract_after_keyword(&text, &["postfix", "sendmail", "exim", "exchange"]);
        return Some(with_info(ServiceMatch::new("smtp"), product, version));
    }

    if lower.starts_with("+ok") {
        return Some(with_info(ServiceMatch::new("pop3"), None, extract_version_number(&lower)));
    }

    if lower.starts_with("* ok") {
        let product = if lower.contains("dovecot") {
            Some("Dovecot".to_string())
        } else {
            None
        };
        return Some(with_info(
            ServiceMatch::new("imap"),
            product,
            extract_version_number(&lower),
        ));
    }

    // RESP replies to PING: "+PONG", "-NOAUTH Authentication required.", "-ERR ..."
    if lower.starts_with("+pong")
        || lower.starts_with("-noauth")
        || lower.starts_with("-denied")
        || lower.contains("redis")
    {
        let mut svc =
            ServiceMatch::new("redis").with_product("Redis key-value store".to_string());
        if let Some(v) = extract_redis_version(&lower) {
            svc = svc.with_version(v);
        }
        return Some(svc);
    }

    if lower.contains("mysql")
        || lower.contains("mariadb")
        || (port == 3306 && banner.len() > 5 && banner[4] == 0x0a)
    {
        return Some(with_info(
            ServiceMatch::new("mysql"),
            Some("MySQL".to_string()),
            extract_version_number(&lower),
        ));
    }

    if lower.starts_with("rfb ") {
        let version = lower.get(4..11).map(|v| v.trim().to_string());
        return Some(with_info(ServiceMatch::new("vnc"), None, version));
    }

    if lower.contains("login:") || lower.contains("telnet") {
        return Some(ServiceMatch::new("telnet"));
    }

    None
}

fn with_info(
    mut svc: ServiceMatch,
    product: Option<String>,
    version: Option<String>,
) -> ServiceMatch {
    if let Some(p) = product {
        svc = svc.with_product(p);
    }
    if let Some(v) = version {
        svc = svc.with_version(v);
    }
    svc
}

/// Extract the `Server:` header as (product, version)
fn extract_http_info(banner: &str) -> (Option<String>, Option<String>) {
    let Some(idx) = banner.to_ascii_lowercase().find("\nserver:") else {
        return (None, None);
    };
    let line = &banner[idx + "\nserver:".len()..];
    let value = line.lines().next().unwrap_or("").trim();
    if value.is_empty() {
        return (None, None);
    }
    match value.split_once('/') {
        Some((product, rest)) => (
            Some(product.trim().to_string()),
            rest.split_whitespace().next().map(str::to_string),
        ),
        None => (Some(value.to_string()), None),
    }
}

/// Extract SSH product and version: "SSH-2.0-OpenSSH_8.2p1 Ubuntu"
fn extract_ssh_info(banner: &str) -> (Option<String>, Option<String>) {
    let line = banner.lines().next().unwrap_or("");
    let software = line.splitn(3, '-').nth(2).unwrap_or("");
    let software = software.split_whitespace().next().unwrap_or("");
    if software.is_empty() {
        return (None, None);
    }
    match software.split_once('_') {
        Some((product, version)) => (Some(product.to_string()), Some(version.to_string())),
        None => (Some(software.to_string()), None),
    }
}

/// Product is the first word containing a known keyword; version the word after it.
fn extract_after_keyword(banner: &str, keywords: &[&str]) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = banner.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        let folded = part.to_ascii_lowercase();
        if keywords.iter().any(|k| folded.contains(k)) {
            let version = parts
                .get(i + 1)
                .filter(|v| v.chars().next().is_some_and(|c| c.is_ascii_digit()))
                .map(|v| v.to_string())
                .or_else(|| extract_version_number(banner));
            return (Some(part.to_string()), version);
        }
    }
    (None, extract_version_number(banner))
}

/// "redis_version:6.2.5" (INFO) or "v=6.2.5"
fn extract_redis_version(banner: &str) -> Option<String> {
    for marker in ["redis_version:", "v="] {
        if let Some(idx) = banner.find(marker) {
            let rest = &banner[idx + marker.len()..];
            let end = rest.find(|c: char| c.is_whitespace()).unwrap_or(rest.len());
            if end > 0 {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}

/// BSON "version" string field inside an isMaster/buildInfo reply
fn extract_mongodb_version(banner: &str) -> Option<String> {
    let idx = banner.find("version\0")?;
    extract_version_number(&banner[idx..])
}

/// Generic version number extractor ("1.2.3", "v2.0", "version 3.4.5")
fn extract_version_number(text: &str) -> Option<String> {
    static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?:v|version)?\s*(\d+\.\d+(?:\.\d+)?(?:\.\d+)?)").expect("static regex")
    });

    VERSION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Detect service from port and banner (banner evidence first)
pub fn detect_service(port: u16, banner: Option<&[u8]>) -> Option<ServiceMatch> {
    if let Some(b) = banner {
        if let Some(service) = detect_service_from_banner(b, port) {
            return Some(service);
        }
    }

    detect_service_from_port(port)
}
