//! Active probe payloads sent when a port stays silent.
//!
//! Which payload is sent depends on the port hint; servers that do not speak
//! the hinted protocol usually answer with an error that still identifies them
//! (TLS servers reply to the HTTP probe with an alert record, for example).

/// Plain HTTP/1.0 request. Doubles as the TLS detector.
pub const HTTP_GET: &[u8] = b"GET / HTTP/1.0\r\n\r\n";

/// RESP array `["PING"]`.
pub const REDIS_PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";

/// OP_QUERY opcode of the legacy MongoDB wire protocol.
pub const OP_QUERY: i32 = 2004;
/// OP_REPLY opcode.
pub const OP_REPLY: i32 = 1;
/// OP_MSG opcode (MongoDB 3.6+).
pub const OP_MSG: i32 = 2013;

/// `{isMaster: 1}` against `admin.$cmd`, encoded as an OP_QUERY.
#[must_use]
pub fn mongodb_is_master() -> Vec<u8> {
    // BSON: int32 len | 0x10 "isMaster\0" int32(1) | 0x00
    let mut doc = Vec::with_capacity(19);
    doc.extend_from_slice(&19i32.to_le_bytes());
    doc.push(0x10);
    doc.extend_from_slice(b"isMaster\0");
    doc.extend_from_slice(&1i32.to_le_bytes());
    doc.push(0x00);

    let collection = b"admin.$cmd\0";
    let len = 16 + 4 + collection.len() + 4 + 4 + doc.len();
    let mut msg = Vec::with_capacity(len);
    msg.extend_from_slice(&(len as i32).to_le_bytes());
    msg.extend_from_slice(&1i32.to_le_bytes()); // requestID
    msg.extend_from_slice(&0i32.to_le_bytes()); // responseTo
    msg.extend_from_slice(&OP_QUERY.to_le_bytes());
    msg.extend_from_slice(&0i32.to_le_bytes()); // flags
    msg.extend_from_slice(collection);
    msg.extend_from_slice(&0i32.to_le_bytes()); // numberToSkip
    msg.extend_from_slice(&(-1i32).to_le_bytes()); // numberToReturn
    msg.extend_from_slice(&doc);
    msg
}

/// Payload to try for a port, given the port-based service hint.
#[must_use]
pub fn probe_for(hint: Option<&str>) -> Vec<u8> {
    match hint {
        Some("mongodb") => mongodb_is_master(),
        Some("redis") => REDIS_PING.to_vec(),
        _ => HTTP_GET.to_vec(),
    }
}

/// Does this look like a MongoDB wire-protocol reply?
#[must_use]
pub fn is_mongodb_reply(data: &[u8]) -> bool {
    if data.len() < 16 {
        return false;
    }
    let len = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let opcode = i32::from_le_bytes([data[12], data[13], data[14], data[15]]);
    len >= 16 && (opcode == OP_REPLY || opcode == OP_MSG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_master_header_is_consistent() {
        let msg = mongodb_is_master();
        let len = i32::from_le_bytes([msg[0], msg[1], msg[2], msg[3]]) as usize;
        assert_eq!(len, msg.len());
        assert_eq!(&msg[12..16], &OP_QUERY.to_le_bytes());
    }

    #[test]
    fn reply_detection() {
        let mut reply = vec![0u8; 36];
        reply[0..4].copy_from_slice(&36i32.to_le_bytes());
        reply[12..16].copy_from_slice(&OP_REPLY.to_le_bytes());
        assert!(is_mongodb_reply(&reply));
        assert!(!is_mongodb_reply(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn probe_selection() {
        assert_eq!(probe_for(Some("redis")), REDIS_PING);
        assert_eq!(probe_for(None), HTTP_GET);
    }
}
