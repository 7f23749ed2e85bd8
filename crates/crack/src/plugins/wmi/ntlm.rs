//! NTLMv2 client messages (MS-NLMP), enough to authenticate one DCERPC bind.

use astra_common::CrackError;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const NEGOTIATE: u32 = 1;
const CHALLENGE: u32 = 2;
const AUTHENTICATE: u32 = 3;

/// UNICODE | REQUEST_TARGET | NTLM | ALWAYS_SIGN | EXTENDED_SESSIONSECURITY | 128 | 56
pub const NEGOTIATE_FLAGS: u32 = 0xA008_8205;

const AUTHENTICATE_HEADER_LEN: usize = 64;

/// MsvAvTimestamp in the server's target info.
const AV_TIMESTAMP: u16 = 7;
const AV_EOL: u16 = 0;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_DELTA: u64 = 11_644_473_600;

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// NTOWFv1: MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md4::digest(utf16le(password)));
    out
}

/// NTOWFv2: HMAC-MD5 keyed by the NT hash over `UPPER(user) || domain`.
pub fn ntowf_v2(nt_hash: &[u8; 16], user: &str, domain: &str) -> [u8; 16] {
    let identity = utf16le(&format!("{}{}", user.to_uppercase(), domain));
    hmac_md5(nt_hash, &[&identity])
}

/// Account material for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmIdentity {
    pub domain: String,
    pub user: String,
    pub nt_hash: [u8; 16],
}

impl NtlmIdentity {
    /// `DOMAIN\user` and `user@domain` select a domain; otherwise it is empty.
    /// A password of exactly 32 hex digits is taken as the NT hash itself.
    pub fn new(username: &str, password: &str) -> Self {
        let (domain, user) = if let Some((d, u)) = username.split_once('\\') {
            (d, u)
        } else if let Some((u, d)) = username.split_once('@') {
            (d, u)
        } else {
            ("", username)
        };

        let nt_hash = parse_nt_hash(password).unwrap_or_else(|| nt_hash(password));
        Self {
            domain: domain.to_string(),
            user: user.to_string(),
            nt_hash,
        }
    }
}

fn parse_nt_hash(password: &str) -> Option<[u8; 16]> {
    if password.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    hex::decode_to_slice(password, &mut out).ok()?;
    Some(out)
}

/// Type 1 message with no domain or workstation supplied.
pub fn negotiate_message() -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&NEGOTIATE.to_le_bytes());
    out.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
    // domain and workstation security buffers, both empty
    out.extend_from_slice(&[0u8; 16]);
    out
}

/// Fields of a type 2 message the client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

fn u16_at(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(at..at + 2)?.try_into().ok()?))
}

fn u32_at(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

impl Challenge {
    pub fn parse(msg: &[u8]) -> Result<Self, CrackError> {
        let bad = |what: &str| CrackError::protocol(format!("ntlm challenge: {what}"));

        if msg.get(..8) != Some(&SIGNATURE[..]) {
            return Err(bad("bad signature"));
        }
        if u32_at(msg, 8) != Some(CHALLENGE) {
            return Err(bad("not a challenge message"));
        }
        let flags = u32_at(msg, 20).ok_or_else(|| bad("truncated"))?;
        let server_challenge: [u8; 8] = msg
            .get(24..32)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| bad("truncated"))?;

        // target info is optional in old servers
        let target_info = match (u16_at(msg, 40), u32_at(msg, 44)) {
            (Some(len), Some(offset)) if len > 0 => {
                let start = offset as usize;
                msg.get(start..start + usize::from(len))
                    .ok_or_else(|| bad("target info out of bounds"))?
                    .to_vec()
            }
            _ => Vec::new(),
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// MsvAvTimestamp from the target info, if the server sent one.
    pub fn timestamp(&self) -> Option<u64> {
        let info = &self.target_info;
        let mut at = 0;
        while let (Some(id), Some(len)) = (u16_at(info, at), u16_at(info, at + 2)) {
            let value = info.get(at + 4..at + 4 + usize::from(len))?;
            match id {
                AV_EOL => return None,
                AV_TIMESTAMP => return Some(u64::from_le_bytes(value.try_into().ok()?)),
                _ => at += 4 + usize::from(len),
            }
        }
        None
    }
}

/// Current time as a Windows FILETIME.
pub fn filetime_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_unix.as_secs() + FILETIME_EPOCH_DELTA) * 10_000_000
        + u64::from(since_unix.subsec_nanos() / 100)
}

/// NTLMv2 response: `NTProofStr || blob`.
pub fn ntlmv2_response(
    v2_hash: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let proof = hmac_md5(v2_hash, &[server_challenge, &blob]);
    let mut out = proof.to_vec();
    out.extend_from_slice(&blob);
    out
}

/// Type 3 message. The LM response is zeroed as NTLMv2 clients do when the
/// server supplies target info.
pub fn authenticate_message(
    identity: &NtlmIdentity,
    challenge: &Challenge,
    client_challenge: &[u8; 8],
    timestamp: u64,
) -> Vec<u8> {
    let v2_hash = ntowf_v2(&identity.nt_hash, &identity.user, &identity.domain);
    let nt = ntlmv2_response(
        &v2_hash,
        &challenge.server_challenge,
        client_challenge,
        timestamp,
        &challenge.target_info,
    );
    let lm = [0u8; 24];
    let domain = utf16le(&identity.domain);
    let user = utf16le(&identity.user);

    let mut msg = Vec::with_capacity(AUTHENTICATE_HEADER_LEN + nt.len() + 128);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&AUTHENTICATE.to_le_bytes());

    // lm, nt, domain, user, workstation, session key
    let fields: [&[u8]; 6] = [&lm, &nt, &domain, &user, &[], &[]];
    let mut offset = AUTHENTICATE_HEADER_LEN;
    for data in fields {
        let len = data.len() as u16;
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += data.len();
    }
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
    for data in fields {
        msg.extend_from_slice(data);
    }
    msg
}
