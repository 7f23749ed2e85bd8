//! Connection-oriented DCE/RPC PDUs (C706 ch. 12, MS-RPCE) for an NTLM bind
//! to the endpoint mapper port.

use astra_common::CrackError;

pub const PTYPE_REQUEST: u8 = 0;
pub const PTYPE_RESPONSE: u8 = 2;
pub const PTYPE_FAULT: u8 = 3;
pub const PTYPE_BIND: u8 = 11;
pub const PTYPE_BIND_ACK: u8 = 12;
pub const PTYPE_BIND_NAK: u8 = 13;
pub const PTYPE_AUTH3: u8 = 16;

const PFC_FIRST_LAST: u8 = 0x03;
/// Little-endian integers, ASCII, IEEE floats.
const DREP: [u8; 4] = [0x10, 0, 0, 0];

pub const HEADER_LEN: usize = 16;
const SEC_TRAILER_LEN: usize = 8;
const MAX_FRAG: u16 = 4280;

const AUTH_TYPE_NTLM: u8 = 10;
const AUTH_LEVEL_CONNECT: u8 = 2;

/// nca_s_fault_access_denied / ERROR_ACCESS_DENIED
pub const STATUS_ACCESS_DENIED: u32 = 5;

/// IObjectExporter 99fcfec4-5260-101b-bbcb-00aa0021347a v0.0
const IOBJECT_EXPORTER: [u8; 16] = [
    0xc4, 0xfe, 0xfc, 0x99, 0x60, 0x52, 0x1b, 0x10, 0xbb, 0xcb, 0x00, 0xaa, 0x00, 0x21, 0x34, 0x7a,
];
/// NDR transfer syntax 8a885d04-1ceb-11c9-9fe8-08002b104860 v2
const NDR_SYNTAX: [u8; 16] = [
    0x04, 0x5d, 0x88, 0x8a, 0xeb, 0x1c, 0xc9, 0x11, 0x9f, 0xe8, 0x08, 0x00, 0x2b, 0x10, 0x48, 0x60,
];

/// IObjectExporter::ServerAlive
pub const OPNUM_SERVER_ALIVE: u16 = 3;

fn header(ptype: u8, frag_len: usize, auth_len: usize, call_id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(frag_len);
    out.extend_from_slice(&[5, 0, ptype, PFC_FIRST_LAST]);
    out.extend_from_slice(&DREP);
    out.extend_from_slice(&(frag_len as u16).to_le_bytes());
    out.extend_from_slice(&(auth_len as u16).to_le_bytes());
    out.extend_from_slice(&call_id.to_le_bytes());
    out
}

fn sec_trailer(pad: u8) -> [u8; SEC_TRAILER_LEN] {
    [AUTH_TYPE_NTLM, AUTH_LEVEL_CONNECT, pad, 0, 0, 0, 0, 0]
}

/// Assemble header + body + padding + trailer + auth value.
fn with_auth(ptype: u8, call_id: u32, body: &[u8], auth: &[u8]) -> Vec<u8> {
    let pad = (4 - (HEADER_LEN + body.len()) % 4) % 4;
    let frag_len = HEADER_LEN + body.len() + pad + SEC_TRAILER_LEN + auth.len();
    let mut out = header(ptype, frag_len, auth.len(), call_id);
    out.extend_from_slice(body);
    out.extend(std::iter::repeat(0).take(pad));
    out.extend_from_slice(&sec_trailer(pad as u8));
    out.extend_from_slice(auth);
    out
}

/// Bind to IObjectExporter carrying the NTLM negotiate message.
pub fn bind(call_id: u32, negotiate: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(56);
    body.extend_from_slice(&MAX_FRAG.to_le_bytes());
    body.extend_from_slice(&MAX_FRAG.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // assoc group
    body.extend_from_slice(&[1, 0, 0, 0]); // one context, padding
    body.extend_from_slice(&0u16.to_le_bytes()); // context id
    body.extend_from_slice(&[1, 0]); // one transfer syntax
    body.extend_from_slice(&IOBJECT_EXPORTER);
    body.extend_from_slice(&[0, 0, 0, 0]); // v0.0
    body.extend_from_slice(&NDR_SYNTAX);
    body.extend_from_slice(&2u32.to_le_bytes());
    with_auth(PTYPE_BIND, call_id, &body, negotiate)
}

/// AUTH3 completing the three-leg handshake. The 4 bytes of body are
/// padding Windows expects before the trailer.
pub fn auth3(call_id: u32, authenticate: &[u8]) -> Vec<u8> {
    with_auth(PTYPE_AUTH3, call_id, &[0x20; 4], authenticate)
}

/// Request with an empty stub and a zero NTLM verifier.
pub fn request(call_id: u32, opnum: u16, seq: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&0u32.to_le_bytes()); // alloc hint
    body.extend_from_slice(&0u16.to_le_bytes()); // context id
    body.extend_from_slice(&opnum.to_le_bytes());

    let mut verifier = [0u8; 16];
    verifier[..4].copy_from_slice(&1u32.to_le_bytes());
    verifier[12..].copy_from_slice(&seq.to_le_bytes());
    with_auth(PTYPE_REQUEST, call_id, &body, &verifier)
}

/// A received PDU, header already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub ptype: u8,
    pub call_id: u32,
    auth_len: usize,
    raw: Vec<u8>,
}

/// Fragment length from a 16-byte header.
pub fn frag_len(header: &[u8]) -> Result<usize, CrackError> {
    if header.len() < HEADER_LEN || header[0] != 5 {
        return Err(CrackError::protocol("not a DCE/RPC v5 PDU"));
    }
    let len = usize::from(u16::from_le_bytes([header[8], header[9]]));
    if len < HEADER_LEN {
        return Err(CrackError::protocol(format!("fragment length {len} too short")));
    }
    Ok(len)
}

impl Pdu {
    pub fn parse(raw: Vec<u8>) -> Result<Self, CrackError> {
        let len = frag_len(&raw)?;
        if raw.len() < len {
            return Err(CrackError::protocol("truncated PDU"));
        }
        let auth_len = usize::from(u16::from_le_bytes([raw[10], raw[11]]));
        if auth_len > len - HEADER_LEN {
            return Err(CrackError::protocol("auth length exceeds fragment"));
        }
        Ok(Self {
            ptype: raw[2],
            call_id: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
            auth_len,
            raw,
        })
    }

    /// The auth value at the tail of the fragment, if any.
    pub fn auth_value(&self) -> Option<&[u8]> {
        if self.auth_len == 0 {
            return None;
        }
        let end = frag_len(&self.raw).ok()?;
        self.raw.get(end - self.auth_len..end)
    }

    /// Status code of a fault PDU.
    pub fn fault_status(&self) -> Option<u32> {
        if self.ptype != PTYPE_FAULT {
            return None;
        }
        let bytes = self.raw.get(24..28)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_layout() {
        let negotiate = [0xab; 32];
        let pdu = bind(1, &negotiate);
        assert_eq!(pdu.len(), 16 + 56 + 8 + 32);
        assert_eq!(frag_len(&pdu).unwrap(), pdu.len());
        assert_eq!(pdu[2], PTYPE_BIND);
        assert_eq!(u16::from_le_bytes([pdu[10], pdu[11]]), 32);
        // trailer sits right after the 4-aligned body
        assert_eq!(&pdu[72..76], &[AUTH_TYPE_NTLM, AUTH_LEVEL_CONNECT, 0, 0]);
        assert_eq!(&pdu[80..], &negotiate[..]);
        assert_eq!(&pdu[32..48], &IOBJECT_EXPORTER);
    }

    #[test]
    fn auth3_and_request_layout() {
        let pdu = auth3(7, &[1, 2, 3]);
        assert_eq!(pdu[2], PTYPE_AUTH3);
        assert_eq!(pdu.len(), 16 + 4 + 8 + 3);
        assert_eq!(u32::from_le_bytes([pdu[12], pdu[13], pdu[14], pdu[15]]), 7);

        let pdu = request(7, OPNUM_SERVER_ALIVE, 0);
        assert_eq!(pdu.len(), 16 + 8 + 8 + 16);
        assert_eq!(u16::from_le_bytes([pdu[22], pdu[23]]), OPNUM_SERVER_ALIVE);
    }

    #[test]
    fn parse_bind_ack_auth_value() {
        let raw = with_auth(PTYPE_BIND_ACK, 1, &[0u8; 26], b"challenge");
        let pdu = Pdu::parse(raw).unwrap();
        assert_eq!(pdu.ptype, PTYPE_BIND_ACK);
        assert_eq!(pdu.auth_value(), Some(&b"challenge"[..]));
    }

    #[test]
    fn parse_fault_status() {
        let mut raw = header(PTYPE_FAULT, 32, 0, 1);
        raw.extend_from_slice(&[0u8; 8]);
        raw.extend_from_slice(&STATUS_ACCESS_DENIED.to_le_bytes());
        raw.extend_from_slice(&[0u8; 4]);
        let pdu = Pdu::parse(raw).unwrap();
        assert_eq!(pdu.fault_status(), Some(STATUS_ACCESS_DENIED));
        assert_eq!(pdu.auth_value(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Pdu::parse(b"HTTP/1.1 400 Bad Request\r\n".to_vec()).is_err());
        assert!(Pdu::parse(vec![5, 0, 12, 3]).is_err());
    }
}
