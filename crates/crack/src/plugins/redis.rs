//! Redis AUTH over RESP.

use astra_common::{CrackError, CrackOutcome};
use async_trait::async_trait;
use tracing::debug;

use crate::net;
use crate::plugin::{Attempt, CrackPlugin, Endpoint};

/// Encode a command as a RESP array of bulk strings.
pub(crate) fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// How a reply to AUTH should be read.
#[derive(Debug, PartialEq, Eq)]
enum AuthReply {
    Accepted,
    Rejected,
    /// ACL-style `AUTH user pass` on a server that only knows `AUTH pass`.
    WrongArity,
    Other(String),
}

fn classify_auth(reply: &[u8]) -> AuthReply {
    let text = String::from_utf8_lossy(reply);
    let line = text.lines().next().unwrap_or_default().trim();
    if line.starts_with("+OK") {
        return AuthReply::Accepted;
    }
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("-wrongpass")
        || lower.contains("invalid password")
        || lower.contains("invalid username-password pair")
    {
        AuthReply::Rejected
    } else if lower.contains("wrong number of arguments") {
        AuthReply::WrongArity
    } else {
        AuthReply::Other(line.to_string())
    }
}

pub struct RedisPlugin;

impl RedisPlugin {
    async fn auth(&self, attempt: &Attempt<'_>, args: &[&str]) -> Result<AuthReply, CrackError> {
        let endpoint = &attempt.endpoint;
        let mut stream = net::dial(endpoint).await?;
        let reply = net::exchange(&mut stream, &encode_command(args), endpoint.timeout).await?;
        Ok(classify_auth(&reply))
    }
}

#[async_trait]
impl CrackPlugin for RedisPlugin {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn default_usernames(&self) -> &'static [&'static str] {
        &["default"]
    }

    async fn check_unauth(&self, endpoint: &Endpoint<'_>) -> Option<CrackOutcome> {
        let result = async {
            let mut stream = net::dial(endpoint).await?;
            net::exchange(&mut stream, &encode_command(&["PING"]), endpoint.timeout).await
        }
        .await;

        match result {
            Ok(reply) if reply.starts_with(b"+PONG") => Some(CrackOutcome::Success),
            Ok(reply) => {
                debug!(
                    addr = %endpoint.address,
                    reply = %String::from_utf8_lossy(&reply).trim(),
                    "redis requires auth"
                );
                None
            }
            Err(e) => Some(CrackOutcome::Error(e)),
        }
    }

    async fn probe(&self, attempt: &Attempt<'_>) -> CrackOutcome {
        let user = attempt.username();
        let pass = attempt.password();

        let first = if user.is_empty() {
            self.auth(attempt, &["AUTH", pass]).await
        } else {
            self.auth(attempt, &["AUTH", user, pass]).await
        };

        let reply = match first {
            Ok(AuthReply::WrongArity) if !user.is_empty() => {
                match self.auth(attempt, &["AUTH", pass]).await {
                    Ok(reply) => reply,
                    Err(e) => return e.into(),
                }
            }
            Ok(reply) => reply,
            Err(e) => return e.into(),
        };

        match reply {
            AuthReply::Accepted => CrackOutcome::Success,
            AuthReply::Rejected => CrackOutcome::Fail,
            AuthReply::WrongArity => {
                CrackOutcome::Error(CrackError::protocol("AUTH arity rejected"))
            }
            AuthReply::Other(line) => CrackOutcome::Error(CrackError::protocol(line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astra_common::{CrackErrorKind, Credential};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every connection's first command with `respond(command)`.
    async fn fake_redis<F>(respond: F) -> SocketAddr
    where
        F: Fn(&[u8]) -> &'static [u8] + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let respond = std::sync::Arc::new(respond);
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                let respond = respond.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 512];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    let _ = sock.write_all(respond(&buf[..n])).await;
                });
            }
        });
        addr
    }

    fn endpoint(address: SocketAddr) -> Endpoint<'static> {
        Endpoint {
            address,
            timeout: Duration::from_millis(500),
            proxy: None,
        }
    }

    #[test]
    fn resp_encoding() {
        assert_eq!(encode_command(&["PING"]), b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(
            encode_command(&["AUTH", "default", "pw"]),
            b"*3\r\n$4\r\nAUTH\r\n$7\r\ndefault\r\n$2\r\npw\r\n"
        );
    }

    #[test]
    fn auth_reply_classification() {
        assert_eq!(classify_auth(b"+OK\r\n"), AuthReply::Accepted);
        assert_eq!(
            classify_auth(b"-WRONGPASS invalid username-password pair or user is disabled.\r\n"),
            AuthReply::Rejected
        );
        assert_eq!(classify_auth(b"-ERR invalid password\r\n"), AuthReply::Rejected);
        assert_eq!(
            classify_auth(b"-ERR wrong number of arguments for 'auth' command\r\n"),
            AuthReply::WrongArity
        );
        assert!(matches!(
            classify_auth(b"-ERR Client sent AUTH, but no password is set\r\n"),
            AuthReply::Other(_)
        ));
    }

    #[tokio::test]
    async fn open_instance_is_unauthenticated_success() {
        let addr = fake_redis(|_| b"+PONG\r\n").await;
        let outcome = RedisPlugin.check_unauth(&endpoint(addr)).await;
        assert_eq!(outcome, Some(CrackOutcome::Success));
    }

    #[tokio::test]
    async fn protected_instance_is_inconclusive() {
        let addr = fake_redis(|_| b"-NOAUTH Authentication required.\r\n").await;
        assert_eq!(RedisPlugin.check_unauth(&endpoint(addr)).await, None);
    }

    #[tokio::test]
    async fn correct_and_wrong_passwords() {
        let addr = fake_redis(|cmd| {
            if cmd.ends_with(b"$6\r\nsecret\r\n") {
                b"+OK\r\n"
            } else {
                b"-WRONGPASS invalid username-password pair\r\n"
            }
        })
        .await;

        let good = Credential::new("default", "secret");
        let bad = Credential::new("default", "nope");
        let ep = endpoint(addr);

        let ok = RedisPlugin.probe(&Attempt { endpoint: ep, credential: &good }).await;
        assert_eq!(ok, CrackOutcome::Success);
        let fail = RedisPlugin.probe(&Attempt { endpoint: ep, credential: &bad }).await;
        assert_eq!(fail, CrackOutcome::Fail);
    }

    #[tokio::test]
    async fn legacy_server_falls_back_to_single_argument_auth() {
        let addr = fake_redis(|cmd| {
            if cmd.starts_with(b"*3") {
                b"-ERR wrong number of arguments for 'auth' command\r\n"
            } else if cmd.ends_with(b"$6\r\nsecret\r\n") {
                b"+OK\r\n"
            } else {
                b"-ERR invalid password\r\n"
            }
        })
        .await;

        let cred = Credential::new("default", "secret");
        let outcome = RedisPlugin
            .probe(&Attempt {
                endpoint: endpoint(addr),
                credential: &cred,
            })
            .await;
        assert_eq!(outcome, CrackOutcome::Success);
    }

    #[tokio::test]
    async fn unreachable_server_is_error_not_fail() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let cred = Credential::new("default", "x");
        let outcome = RedisPlugin
            .probe(&Attempt {
                endpoint: endpoint(addr),
                credential: &cred,
            })
            .await;
        match outcome {
            CrackOutcome::Error(e) => assert_eq!(e.kind, CrackErrorKind::Transport),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
