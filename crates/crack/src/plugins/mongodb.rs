//! MongoDB: legacy `getLog` unauthenticated check, then SCRAM via the driver.

use astra_common::{CrackError, CrackOutcome};
use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, Credential as MongoCredential, ServerAddress};
use mongodb::Client;
use tracing::debug;

use crate::net;
use crate::plugin::{Attempt, CrackPlugin, Endpoint};

const OP_QUERY: i32 = 2004;

/// Reply marker proving `getLog` ran without authentication.
const UNAUTH_MARKER: &[u8] = b"totalLinesWritten";

/// Legacy `OP_QUERY` message (pre-3.6 wire protocol).
///
/// Layout, all little-endian:
///
/// | field            | size |
/// |------------------|------|
/// | message length   | 4    |
/// | request id       | 4    |
/// | response to      | 4    |
/// | opcode (2004)    | 4    |
/// | flags            | 4    |
/// | collection       | cstr |
/// | number to skip   | 4    |
/// | number to return | 4    |
/// | query            | bson |
#[derive(Debug, Clone)]
pub struct OpQuery {
    pub request_id: i32,
    pub flags: i32,
    pub collection: &'static str,
    pub skip: i32,
    pub limit: i32,
    pub query: Document,
}

impl OpQuery {
    /// `admin.$cmd` `{getLog: "startupWarnings"}`, request id 2.
    pub fn startup_warnings() -> Self {
        Self {
            request_id: 2,
            flags: 0,
            collection: "admin.$cmd",
            skip: 0,
            limit: 1,
            query: doc! { "getLog": "startupWarnings" },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CrackError> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.to_le_bytes());
        body.extend_from_slice(self.collection.as_bytes());
        body.push(0);
        body.extend_from_slice(&self.skip.to_le_bytes());
        body.extend_from_slice(&self.limit.to_le_bytes());
        self.query
            .to_writer(&mut body)
            .map_err(|e| CrackError::protocol(format!("encode query: {e}")))?;

        let len = i32::try_from(16 + body.len())
            .map_err(|_| CrackError::protocol("query too large"))?;
        let mut out = Vec::with_capacity(16 + body.len());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&OP_QUERY.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

pub struct MongodbPlugin;

impl MongodbPlugin {
    fn client_options(attempt: &Attempt<'_>) -> ClientOptions {
        let endpoint = &attempt.endpoint;
        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: endpoint.address.ip().to_string(),
            port: Some(endpoint.address.port()),
        }];
        // the login database is the username itself
        options.credential = Some(
            MongoCredential::builder()
                .username(attempt.username().to_string())
                .password(attempt.password().to_string())
                .source(attempt.username().to_string())
                .build(),
        );
        options.connect_timeout = Some(endpoint.timeout);
        options.server_selection_timeout = Some(endpoint.timeout);
        options.direct_connection = Some(true);
        options.app_name = Some("astra".to_string());
        options
    }
}

fn is_auth_rejection(text: &str) -> bool {
    text.contains("Authentication failed")
}

fn classify_driver_error(err: &mongodb::error::Error) -> CrackOutcome {
    let text = err.to_string();
    if is_auth_rejection(&text) {
        return CrackOutcome::Fail;
    }
    match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => CrackOutcome::Fail,
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => {
            CrackOutcome::Error(CrackError::transport(text))
        }
        _ => CrackOutcome::Error(CrackError::protocol(text)),
    }
}

#[async_trait]
impl CrackPlugin for MongodbPlugin {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mongo", "mongod"]
    }

    fn default_usernames(&self) -> &'static [&'static str] {
        &["root", "admin"]
    }

    async fn check_unauth(&self, endpoint: &Endpoint<'_>) -> Option<CrackOutcome> {
        let request = match OpQuery::startup_warnings().encode() {
            Ok(bytes) => bytes,
            Err(e) => return Some(e.into()),
        };
        let result = async {
            let mut stream = net::dial(endpoint).await?;
            net::exchange(&mut stream, &request, endpoint.timeout).await
        }
        .await;

        match result {
            Ok(reply) if contains(&reply, UNAUTH_MARKER) => Some(CrackOutcome::Success),
            Ok(_) => None,
            Err(e) => Some(e.into()),
        }
    }

    async fn probe(&self, attempt: &Attempt<'_>) -> CrackOutcome {
        if attempt.endpoint.proxy.is_some() {
            debug!(
                addr = %attempt.endpoint.address,
                "mongodb driver dials directly, proxy ignored"
            );
        }
        let client = match Client::with_options(Self::client_options(attempt)) {
            Ok(client) => client,
            Err(e) => return CrackOutcome::Error(CrackError::protocol(e)),
        };

        let outcome = match client
            .database(attempt.username())
            .run_command(doc! { "ping": 1 })
            .await
        {
            Ok(_) => CrackOutcome::Success,
            Err(e) => classify_driver_error(&e),
        };
        client.shutdown().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const LEGACY_GETLOG: [u8; 72] = [
        72, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 212, 7, 0, 0, 0, 0, 0, 0, 97, 100, 109, 105, 110, 46,
        36, 99, 109, 100, 0, 0, 0, 0, 0, 1, 0, 0, 0, 33, 0, 0, 0, 2, 103, 101, 116, 76, 111, 103,
        0, 16, 0, 0, 0, 115, 116, 97, 114, 116, 117, 112, 87, 97, 114, 110, 105, 110, 103, 115,
        0, 0,
    ];

    fn endpoint(address: SocketAddr) -> Endpoint<'static> {
        Endpoint {
            address,
            timeout: Duration::from_millis(500),
            proxy: None,
        }
    }

    async fn fake_server(reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 128];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &LEGACY_GETLOG[..]);
            sock.write_all(reply).await.unwrap();
        });
        addr
    }

    #[test]
    fn getlog_query_matches_legacy_wire_bytes() {
        let encoded = OpQuery::startup_warnings().encode().unwrap();
        assert_eq!(encoded, LEGACY_GETLOG);
    }

    #[tokio::test]
    async fn marker_in_reply_is_unauthenticated_success() {
        let addr = fake_server(b"\x00\x00{\"totalLinesWritten\": 3, \"log\": []}").await;
        let outcome = MongodbPlugin.check_unauth(&endpoint(addr)).await;
        assert_eq!(outcome, Some(CrackOutcome::Success));
    }

    #[tokio::test]
    async fn unauthorized_reply_is_inconclusive() {
        let addr = fake_server(b"\x00\x00errmsg: command getLog requires authentication").await;
        assert_eq!(MongodbPlugin.check_unauth(&endpoint(addr)).await, None);
    }

    #[tokio::test]
    async fn unreachable_server_is_error() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        match MongodbPlugin.check_unauth(&endpoint(addr)).await {
            Some(CrackOutcome::Error(_)) => {}
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn driver_errors_are_classified() {
        assert!(is_auth_rejection(
            "Command failed (AuthenticationFailed): Authentication failed."
        ));
        assert!(!is_auth_rejection("connection reset by peer"));

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = mongodb::error::Error::from(io);
        match classify_driver_error(&err) {
            CrackOutcome::Error(e) => assert_eq!(e.kind, astra_common::CrackErrorKind::Transport),
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
