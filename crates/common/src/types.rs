//! Core data types flowing through the pipeline
//!
//! discovery -> `ProbeResult` -> fingerprinting -> `PortFinding` ->
//! classification -> {`WebTarget`, `ServiceRecord` + `CrackJob`} -> `Report`.
//!
//! Addresses are carried as `SocketAddr` so a finding without a port cannot be
//! constructed; the `host:port` text form only exists at the edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use uuid::Uuid;

/// Port states returned by discovery probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
        };
        f.write_str(s)
    }
}

/// Single discovery target (host + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub ip: IpAddr,
    pub port: u16,
}

impl Target {
    #[inline]
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    #[inline]
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Result of probing a single target during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target: Target,
    pub state: PortState,
    /// Round-trip time of the connect (Duration::ZERO when unknown).
    pub rtt: Duration,
}

impl ProbeResult {
    #[inline]
    #[must_use]
    pub fn new(target: Target, state: PortState) -> Self {
        Self {
            target,
            state,
            rtt: Duration::ZERO,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt = rtt;
        self
    }

    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, PortState::Open)
    }
}

/// Service identified by the detector for one port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMatch {
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub confidence: f32,
}

impl ServiceMatch {
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(service: S) -> Self {
        Self {
            service: service.into(),
            product: None,
            version: None,
            confidence: 1.0,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_product(mut self, product: String) -> Self {
        self.product = Some(product);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: String) -> Self {
        self.version = Some(version);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Output of the fingerprinting engine for one open port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFinding {
    pub address: SocketAddr,
    pub service_name: String,
    pub vendor_product: String,
    pub version: String,
}

impl PortFinding {
    #[must_use]
    pub fn new(address: SocketAddr, service_name: impl Into<String>) -> Self {
        Self {
            address,
            service_name: service_name.into(),
            vendor_product: String::new(),
            version: String::new(),
        }
    }

    /// Build a finding from a detector match; a missing match means `unknown`.
    #[must_use]
    pub fn from_match(address: SocketAddr, service: Option<ServiceMatch>) -> Self {
        match service {
            Some(m) => Self {
                address,
                service_name: m.service,
                vendor_product: m.product.unwrap_or_default(),
                version: m.version.unwrap_or_default(),
            },
            None => Self::new(address, "unknown"),
        }
    }

    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.vendor_product = product.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Host part as it must appear in a URL (`[v6]` bracketed).
    #[must_use]
    pub fn url_host(&self) -> String {
        match self.address.ip() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{ip}]"),
        }
    }

    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

/// A URL with explicit scheme, or a bare `host:port`, destined for web scanning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebTarget(String);

impl WebTarget {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the target carries no scheme and needs one guessed.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        !self.0.contains("://")
    }
}

impl fmt::Display for WebTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finalized, reportable non-web service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub address: SocketAddr,
    pub protocol: String,
    pub version: String,
}

/// A service tagged for credential testing. `protocol` is the canonical
/// plugin name, not necessarily the raw service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrackJob {
    pub address: SocketAddr,
    pub protocol: String,
}

impl CrackJob {
    #[must_use]
    pub fn new(address: SocketAddr, protocol: impl Into<String>) -> Self {
        Self {
            address,
            protocol: protocol.into(),
        }
    }
}

impl fmt::Display for CrackJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.address, self.protocol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse a `user:pass` line. The password may itself contain `:`.
    #[must_use]
    pub fn parse_pair(line: &str) -> Option<Self> {
        let (user, pass) = line.split_once(':')?;
        Some(Self::new(user, pass))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrackErrorKind {
    Transport,
    Timeout,
    Protocol,
}

impl fmt::Display for CrackErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CrackErrorKind::Transport => "transport",
            CrackErrorKind::Timeout => "timeout",
            CrackErrorKind::Protocol => "protocol",
        })
    }
}

/// Why an attempt could not be decided. Never evidence against the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrackError {
    pub kind: CrackErrorKind,
    pub message: String,
}

impl CrackError {
    #[must_use]
    pub fn transport(message: impl ToString) -> Self {
        Self {
            kind: CrackErrorKind::Transport,
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: CrackErrorKind::Timeout,
            message: format!("timed out after {after:?}"),
        }
    }

    #[must_use]
    pub fn protocol(message: impl ToString) -> Self {
        Self {
            kind: CrackErrorKind::Protocol,
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for CrackError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self {
                kind: CrackErrorKind::Timeout,
                message: err.to_string(),
            },
            _ => Self::transport(err),
        }
    }
}

impl fmt::Display for CrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Tri-state result of one credential evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrackOutcome {
    Success,
    /// The protocol explicitly rejected the credential.
    Fail,
    Error(CrackError),
}

impl CrackOutcome {
    #[inline]
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, CrackOutcome::Success)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CrackOutcome::Success => "success",
            CrackOutcome::Fail => "fail",
            CrackOutcome::Error(_) => "error",
        }
    }
}

impl From<CrackError> for CrackOutcome {
    fn from(err: CrackError) -> Self {
        CrackOutcome::Error(err)
    }
}

/// A confirmed weak credential (or unauthenticated access).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrackResult {
    pub address: SocketAddr,
    pub protocol: String,
    pub username: String,
    pub password: String,
    pub unauthenticated: bool,
}

/// An undecided attempt kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrackErrorRecord {
    pub address: SocketAddr,
    pub protocol: String,
    /// `None` for the unauthenticated check.
    pub username: Option<String>,
    pub error: CrackError,
}

/// Per-host summary record of the persisted report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpResult {
    pub ip: String,
    pub ports: String,
    pub country: String,
    pub area: String,
    pub os: String,
}

impl IpResult {
    #[must_use]
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip: ip.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finger {
    pub name: String,
    pub poc_tags: Vec<String>,
}

/// Output of the web scanner for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResult {
    pub url: String,
    pub status: Option<u16>,
    pub title: String,
    pub server: String,
    pub fingers: Vec<Finger>,
}

impl WebResult {
    /// `"<url>|<tag>,<tag>"` input for the vulnerability matcher, when any
    /// finger carries poc tags.
    #[must_use]
    pub fn poc_input(&self) -> Option<String> {
        let tags: Vec<&str> = self
            .fingers
            .iter()
            .flat_map(|f| f.poc_tags.iter().map(String::as_str))
            .collect();
        if tags.is_empty() {
            None
        } else {
            Some(format!("{}|{}", self.url, tags.join(",")))
        }
    }
}

/// Aggregate output of one pipeline run. Written once, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ip_results: Vec<IpResult>,
    pub service_records: Vec<ServiceRecord>,
    pub web_targets: Vec<WebTarget>,
    pub web_results: Vec<WebResult>,
    pub poc_targets: Vec<String>,
    pub crack_results: Vec<CrackResult>,
    pub crack_errors: Vec<CrackErrorRecord>,
}

impl Report {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            ip_results: Vec::new(),
            service_records: Vec::new(),
            web_targets: Vec::new(),
            web_results: Vec::new(),
            poc_targets: Vec::new(),
            crack_results: Vec::new(),
            crack_errors: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}
