//! TCP connect scanner and banner-driven service prober

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::banner::BannerGrabber;
use astra_common::{Fingerprinter, PortFinding, PortState, ProbeResult, Scanner, Target};
use astra_fingerprint::{detect_service, detect_service_from_port};

/// Simple TCP connect scanner used as the discovery engine.
pub struct TcpScanner {
    timeout: Duration,
    retries: u32,
}

impl TcpScanner {
    /// Create a new scanner with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count for connect attempts.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Connect with retries. Refused connections are final; timeouts retry
    /// with a small linear backoff.
    #[instrument(skip(self))]
    async fn try_connect(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        let mut last_error = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            match timeout(self.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => return Err(e),
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(std::io::Error::new(
                        ErrorKind::TimedOut,
                        "connection timeout",
                    ))
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "unknown connect error")))
    }
}

impl Default for TcpScanner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(800),
            retries: 0,
        }
    }
}

#[async_trait]
impl Scanner for TcpScanner {
    async fn scan(&self, target: &Target) -> Result<ProbeResult> {
        let start = Instant::now();
        let state = match self.try_connect(target.socket_addr()).await {
            Ok(_) => PortState::Open,
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => PortState::Closed,
            Err(_) => PortState::Filtered,
        };
        Ok(ProbeResult::new(*target, state).with_rtt(start.elapsed()))
    }

    fn name(&self) -> &str {
        "TCP Connect Scanner"
    }
}

/// Fingerprinting engine: connect, grab a banner, run the detector.
pub struct ServiceProber {
    connect_timeout: Duration,
    banner_timeout: Duration,
}

impl ServiceProber {
    pub fn new(connect_timeout: Duration, banner_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            banner_timeout,
        }
    }
}

impl Default for ServiceProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_millis(1500))
    }
}

#[async_trait]
impl Fingerprinter for ServiceProber {
    async fn fingerprint(&self, addr: SocketAddr) -> Result<PortFinding> {
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .context("connect timeout")?
            .with_context(|| format!("connect to {addr}"))?;

        let hint = detect_service_from_port(addr.port()).map(|m| m.service);
        let banner = BannerGrabber::new(self.banner_timeout)
            .grab(&mut stream, hint.as_deref())
            .await;

        let service = detect_service(addr.port(), banner.as_deref());
        debug!(%addr, service = ?service.as_ref().map(|s| s.service.as_str()), "fingerprinted");
        Ok(PortFinding::from_match(addr, service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        // bind and drop to get a port that is very likely closed
        let closed_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let scanner = TcpScanner::new().with_timeout(Duration::from_millis(500));
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let open = scanner.scan(&Target::new(ip, open_port)).await.unwrap();
        assert!(open.is_open());

        let closed = scanner.scan(&Target::new(ip, closed_port)).await.unwrap();
        assert_eq!(closed.state, PortState::Closed);
    }

    #[tokio::test]
    async fn prober_identifies_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 128];
            let _ = tokio::io::AsyncReadExt::read(&mut sock, &mut buf).await;
            sock.write_all(b"HTTP/1.1 200 OK\r\nServer: Apache/2.4.41\r\n\r\n")
                .await
                .unwrap();
        });

        let prober = ServiceProber::new(Duration::from_millis(500), Duration::from_millis(300));
        let finding = prober.fingerprint(addr).await.unwrap();
        assert_eq!(finding.service_name, "http");
        assert_eq!(finding.vendor_product, "Apache");
        assert_eq!(finding.version, "2.4.41");
    }

    #[tokio::test]
    async fn silent_unknown_port_is_unknown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let prober = ServiceProber::new(Duration::from_millis(500), Duration::from_millis(200));
        let finding = prober.fingerprint(addr).await.unwrap();
        // ephemeral ports carry no port hint
        if detect_service_from_port(addr.port()).is_none() {
            assert_eq!(finding.service_name, "unknown");
        }
    }
}
