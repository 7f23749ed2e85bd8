//! Seams to the pipeline's collaborators
//!
//! Each stage the core does not own (discovery transport, fingerprinting,
//! liveness probing, web scanning, vulnerability matching, geolocation, OS
//! guessing) sits behind one of these traits so the orchestrator can be driven
//! by real engines or by test doubles.

use crate::types::{PortFinding, ProbeResult, Target, WebResult, WebTarget};
use anyhow::Result;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};

/// Discovery scanner: decides whether one host:port is open.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan a single target
    async fn scan(&self, target: &Target) -> Result<ProbeResult>;

    /// Scanner name/identifier
    fn name(&self) -> &str;

    /// Whether this scanner requires root/CAP_NET_RAW
    fn requires_root(&self) -> bool {
        false
    }
}

/// Service/version fingerprinting for an open port.
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, addr: SocketAddr) -> Result<PortFinding>;
}

/// Coarse web-liveness probe used for hosts with implausibly many open ports.
#[async_trait]
pub trait LivenessProber: Send + Sync {
    /// Ports on `host` that answered the probe.
    async fn live_ports(&self, host: IpAddr) -> Vec<u16>;
}

/// Web-scanning consumer.
#[async_trait]
pub trait WebScanner: Send + Sync {
    async fn scan(&self, targets: &[WebTarget]) -> Vec<WebResult>;
}

/// Vulnerability-matching consumer fed with `"<url>|<tags>"` strings.
#[async_trait]
pub trait PocScanner: Send + Sync {
    async fn run(&self, inputs: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub area: String,
}

/// Read-only geolocation lookup, loaded once before any worker starts.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> Option<GeoLocation>;
}

/// Remote operating system guess for a host.
#[async_trait]
pub trait OsDetector: Send + Sync {
    async fn detect(&self, ip: IpAddr) -> Result<String>;
}
