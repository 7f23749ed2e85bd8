//! The per-protocol credential plugin contract.

use astra_common::{CrackOutcome, Credential};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

/// Where and how to reach the service under test.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    pub address: SocketAddr,
    /// Bound on one full round trip (dial + handshake + reply).
    pub timeout: Duration,
    /// SOCKS5 proxy `host:port`, for plugins that dial raw sockets.
    pub proxy: Option<&'a str>,
}

/// One (job, credential) evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub endpoint: Endpoint<'a>,
    pub credential: &'a Credential,
}

impl Attempt<'_> {
    #[inline]
    pub fn username(&self) -> &str {
        &self.credential.username
    }

    #[inline]
    pub fn password(&self) -> &str {
        &self.credential.password
    }
}

pub(crate) const COMMON_PASSWORDS: &[&str] = &[
    "", "{user}", "{user}123", "123456", "password", "admin", "admin123", "root", "12345678",
    "P@ssw0rd", "123qwe", "test",
];

/// A protocol-specific authentication prober.
///
/// `probe` must only answer `Fail` on an explicit, protocol-defined rejection
/// of the credential. Connection failures, timeouts and anything the plugin
/// cannot interpret are `Error`.
#[async_trait]
pub trait CrackPlugin: Send + Sync {
    /// Canonical lower-case protocol name used as the registry key.
    fn name(&self) -> &'static str;

    /// Other service names the fingerprinting engine may report for it.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn default_usernames(&self) -> &'static [&'static str];

    /// Candidate passwords; `{user}` expands to the username.
    fn default_passwords(&self) -> &'static [&'static str] {
        COMMON_PASSWORDS
    }

    /// Unauthenticated-access check run once per job before any credential.
    ///
    /// `Some(Success)` ends the job; `None` means inconclusive.
    async fn check_unauth(&self, _endpoint: &Endpoint<'_>) -> Option<CrackOutcome> {
        None
    }

    async fn probe(&self, attempt: &Attempt<'_>) -> CrackOutcome;
}
