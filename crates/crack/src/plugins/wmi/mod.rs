//! WMI logon check: NTLM-authenticated DCERPC bind on the endpoint mapper,
//! confirmed with an `IObjectExporter::ServerAlive` call.
//!
//! The password may be an NT hash (32 hex digits) for pass-the-hash.

mod dcerpc;
mod ntlm;

use astra_common::{CrackError, CrackErrorKind, CrackOutcome};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::net;
use crate::plugin::{Attempt, CrackPlugin};
use dcerpc::Pdu;
use ntlm::{Challenge, NtlmIdentity};

const BIND_CALL_ID: u32 = 1;
const REQUEST_CALL_ID: u32 = 2;

async fn read_pdu(stream: &mut TcpStream, limit: Duration) -> Result<Pdu, CrackError> {
    let mut raw = net::read_exact(stream, dcerpc::HEADER_LEN, limit).await?;
    let len = dcerpc::frag_len(&raw)?;
    raw.extend(net::read_exact(stream, len - dcerpc::HEADER_LEN, limit).await?);
    Pdu::parse(raw)
}

pub struct WmiPlugin;

impl WmiPlugin {
    async fn logon(&self, attempt: &Attempt<'_>) -> Result<CrackOutcome, CrackError> {
        let endpoint = &attempt.endpoint;
        let limit = endpoint.timeout;
        let identity = NtlmIdentity::new(attempt.username(), attempt.password());
        let mut stream = net::dial(endpoint).await?;

        let bind = dcerpc::bind(BIND_CALL_ID, &ntlm::negotiate_message());
        net::send(&mut stream, &bind, limit).await?;
        let ack = read_pdu(&mut stream, limit).await?;
        match ack.ptype {
            dcerpc::PTYPE_BIND_ACK => {}
            dcerpc::PTYPE_BIND_NAK => return Ok(CrackOutcome::Fail),
            other => {
                return Err(CrackError::protocol(format!(
                    "unexpected PDU type {other} to bind"
                )))
            }
        }
        let Some(challenge) = ack.auth_value() else {
            debug!(addr = %endpoint.address, "bind_ack carried no NTLM challenge");
            return Ok(CrackOutcome::Fail);
        };
        let challenge = Challenge::parse(challenge)?;

        let client_challenge: [u8; 8] = rand::random();
        let timestamp = challenge.timestamp().unwrap_or_else(ntlm::filetime_now);
        let authenticate =
            ntlm::authenticate_message(&identity, &challenge, &client_challenge, timestamp);
        net::send(&mut stream, &dcerpc::auth3(BIND_CALL_ID, &authenticate), limit).await?;

        // AUTH3 has no reply; the first call tells whether the logon held
        net::send(
            &mut stream,
            &dcerpc::request(REQUEST_CALL_ID, dcerpc::OPNUM_SERVER_ALIVE, 0),
            limit,
        )
        .await?;
        let reply = read_pdu(&mut stream, limit).await?;
        match reply.ptype {
            dcerpc::PTYPE_RESPONSE => Ok(CrackOutcome::Success),
            dcerpc::PTYPE_FAULT => {
                let status = reply.fault_status().unwrap_or_default();
                if status != dcerpc::STATUS_ACCESS_DENIED {
                    debug!(addr = %endpoint.address, status, "ServerAlive fault");
                }
                Ok(CrackOutcome::Fail)
            }
            other => Err(CrackError::protocol(format!("unexpected PDU type {other} to request"))),
        }
    }
}

#[async_trait]
impl CrackPlugin for WmiPlugin {
    fn name(&self) -> &'static str {
        "wmi"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["msrpc", "wmihash", "epmap"]
    }

    fn default_usernames(&self) -> &'static [&'static str] {
        &["administrator"]
    }

    async fn probe(&self, attempt: &Attempt<'_>) -> CrackOutcome {
        match self.logon(attempt).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.kind != CrackErrorKind::Timeout {
                    debug!(addr = %attempt.endpoint.address, error = %e, "wmi logon error");
                }
                CrackOutcome::Error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Endpoint;
    use astra_common::Credential;
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const SERVER_CHALLENGE: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

    fn le16(buf: &[u8], at: usize) -> usize {
        usize::from(u16::from_le_bytes([buf[at], buf[at + 1]]))
    }

    fn le32(buf: &[u8], at: usize) -> usize {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize
    }

    fn challenge_message() -> Vec<u8> {
        let target_info = [0u8, 0, 0, 0];
        let mut msg = b"NTLMSSP\0".to_vec();
        msg.extend_from_slice(&2u32.to_le_bytes());
        msg.extend_from_slice(&[0u8; 8]);
        msg.extend_from_slice(&ntlm::NEGOTIATE_FLAGS.to_le_bytes());
        msg.extend_from_slice(&SERVER_CHALLENGE);
        msg.extend_from_slice(&[0u8; 8]);
        msg.extend_from_slice(&4u16.to_le_bytes());
        msg.extend_from_slice(&4u16.to_le_bytes());
        msg.extend_from_slice(&48u32.to_le_bytes());
        msg.extend_from_slice(&target_info);
        msg
    }

    fn pdu(ptype: u8, body: &[u8], auth: &[u8]) -> Vec<u8> {
        let trailer = if auth.is_empty() { 0 } else { 8 + auth.len() };
        let frag = dcerpc::HEADER_LEN + body.len() + trailer;
        let mut out = vec![5, 0, ptype, 3, 0x10, 0, 0, 0];
        out.extend_from_slice(&(frag as u16).to_le_bytes());
        out.extend_from_slice(&(auth.len() as u16).to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(body);
        if !auth.is_empty() {
            out.extend_from_slice(&[10, 2, 0, 0, 0, 0, 0, 0]);
            out.extend_from_slice(auth);
        }
        out
    }

    /// Checks the NTLMv2 proof in AUTH3 against `password` and answers the
    /// ServerAlive request accordingly.
    async fn fake_epmap(password: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let limit = Duration::from_secs(2);
                    let bind = read_pdu(&mut sock, limit).await.unwrap();
                    assert_eq!(bind.ptype, dcerpc::PTYPE_BIND);
                    sock.write_all(&pdu(dcerpc::PTYPE_BIND_ACK, &[0u8; 28], &challenge_message()))
                        .await
                        .unwrap();

                    let auth3 = read_pdu(&mut sock, limit).await.unwrap();
                    assert_eq!(auth3.ptype, dcerpc::PTYPE_AUTH3);
                    let msg = auth3.auth_value().unwrap().to_vec();
                    let field = |at: usize| {
                        let (len, off) = (le16(&msg, at), le32(&msg, at + 4));
                        msg[off..off + len].to_vec()
                    };
                    let nt = field(20);
                    let decode = |b: Vec<u8>| {
                        let units: Vec<u16> =
                            b.chunks(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
                        String::from_utf16(&units).unwrap()
                    };
                    let (domain, user) = (decode(field(28)), decode(field(36)));

                    let v2 = ntlm::ntowf_v2(&ntlm::nt_hash(password), &user, &domain);
                    let blob = &nt[16..];
                    let client_challenge: [u8; 8] = blob[16..24].try_into().unwrap();
                    let timestamp = u64::from_le_bytes(blob[8..16].try_into().unwrap());
                    let expected = ntlm::ntlmv2_response(
                        &v2,
                        &SERVER_CHALLENGE,
                        &client_challenge,
                        timestamp,
                        &[0, 0, 0, 0],
                    );
                    let valid = expected == nt;

                    let request = read_pdu(&mut sock, limit).await.unwrap();
                    assert_eq!(request.ptype, dcerpc::PTYPE_REQUEST);
                    let reply = if valid {
                        pdu(dcerpc::PTYPE_RESPONSE, &[0u8; 8], &[])
                    } else {
                        let mut body = vec![0u8; 8];
                        body.extend_from_slice(&dcerpc::STATUS_ACCESS_DENIED.to_le_bytes());
                        body.extend_from_slice(&[0u8; 4]);
                        pdu(dcerpc::PTYPE_FAULT, &body, &[])
                    };
                    sock.write_all(&reply).await.unwrap();
                });
            }
        });
        addr
    }

    fn attempt<'a>(address: SocketAddr, credential: &'a Credential) -> Attempt<'a> {
        Attempt {
            endpoint: Endpoint {
                address,
                timeout: Duration::from_millis(800),
                proxy: None,
            },
            credential,
        }
    }

    #[tokio::test]
    async fn correct_password_logs_on() {
        let addr = fake_epmap("Summer2024!").await;
        let cred = Credential::new("administrator", "Summer2024!");
        assert_eq!(WmiPlugin.probe(&attempt(addr, &cred)).await, CrackOutcome::Success);
    }

    #[tokio::test]
    async fn nt_hash_logs_on() {
        let addr = fake_epmap("Password").await;
        let cred = Credential::new("CORP\\administrator", "a4f49c406510bdcab6824ee7c30fd852");
        assert_eq!(WmiPlugin.probe(&attempt(addr, &cred)).await, CrackOutcome::Success);
    }

    #[tokio::test]
    async fn wrong_password_is_fail() {
        let addr = fake_epmap("Summer2024!").await;
        let cred = Credential::new("administrator", "admin");
        assert_eq!(WmiPlugin.probe(&attempt(addr, &cred)).await, CrackOutcome::Fail);
    }

    #[tokio::test]
    async fn silent_server_is_timeout_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
        });
        let cred = Credential::new("administrator", "x");
        match WmiPlugin.probe(&attempt(addr, &cred)).await {
            CrackOutcome::Error(e) => assert_eq!(e.kind, CrackErrorKind::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bind_nak_is_fail() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = read_pdu(&mut sock, Duration::from_secs(1)).await;
            sock.write_all(&pdu(dcerpc::PTYPE_BIND_NAK, &[0u8; 4], &[])).await.unwrap();
        });
        let cred = Credential::new("administrator", "x");
        assert_eq!(WmiPlugin.probe(&attempt(addr, &cred)).await, CrackOutcome::Fail);
    }
}
