//! Banner grabbing functionality

use astra_fingerprint::probes::probe_for;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Upper bound on bytes kept from a banner.
const MAX_BANNER: usize = 2048;

pub struct BannerGrabber {
    timeout: Duration,
}

impl BannerGrabber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Grab raw banner bytes from a connected stream.
    ///
    /// Waits passively first (SSH, FTP, SMTP greet on connect), then sends the
    /// payload matching the port hint and reads the reply.
    #[instrument(skip(self, stream))]
    pub async fn grab(&self, stream: &mut TcpStream, hint: Option<&str>) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; MAX_BANNER];

        let passive = self.timeout / 2;
        if let Ok(Ok(n)) = timeout(passive, stream.read(&mut buf)).await {
            if n > 0 {
                debug!("Passive banner grab: {} bytes", n);
                buf.truncate(n);
                return Some(buf);
            }
            // peer closed without greeting
            return None;
        }

        let probe = probe_for(hint);
        if timeout(self.timeout, stream.write_all(&probe)).await.is_err() {
            debug!("Failed to send active probe");
            return None;
        }

        match timeout(self.timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                debug!("Active banner grab: {} bytes", n);
                buf.truncate(n);
                Some(buf)
            }
            Ok(Ok(_)) => {
                debug!("Empty response");
                None
            }
            Ok(Err(e)) => {
                debug!("Read error: {}", e);
                None
            }
            Err(_) => {
                debug!("Banner timeout");
                None
            }
        }
    }
}
