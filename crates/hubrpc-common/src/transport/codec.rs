//! Frame codec for the hubrpc wire format.
//!
//! ```text
//! | total_len:u32 | mtype:u32 | id_len:u32 | id bytes | JSON body |
//! ```
//!
//! All integer fields are big-endian. `total_len` counts everything after
//! itself, so a frame occupies `4 + total_len` bytes on the wire. Frames are
//! self-delimiting: the concatenation of two encoded messages decodes back
//! into both, in order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::error::{HubError, Result};
use crate::protocol::fields::MType;
use crate::protocol::messages::{Body, Message};

const LEN_FIELD: usize = 4;
const MTYPE_FIELD: usize = 4;
const IDLEN_FIELD: usize = 4;

/// Ceiling on bytes a connection may accumulate without yielding a
/// decodable frame before it is torn down.
pub const MAX_BUFFERED: usize = 1 << 16;

/// Serialize a message into one wire frame.
pub fn encode(msg: &Message) -> Result<Bytes> {
    let body = msg.body.to_json()?;
    let id = msg.id.as_bytes();
    let total_len = MTYPE_FIELD + IDLEN_FIELD + id.len() + body.len();

    let mut frame = BytesMut::with_capacity(LEN_FIELD + total_len);
    frame.put_u32(total_len as u32);
    frame.put_u32(msg.mtype().to_wire());
    frame.put_u32(id.len() as u32);
    frame.put_slice(id);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Whether `buf` currently holds at least one complete frame.
pub fn can_decode(buf: &BytesMut) -> bool {
    if buf.len() < LEN_FIELD {
        return false;
    }
    let total_len = u32::from_be_bytes(buf[..LEN_FIELD].try_into().unwrap()) as usize;
    buf.len() - LEN_FIELD >= total_len
}

/// Consume exactly one frame from `buf` and build the typed message.
///
/// Callers must have checked [`can_decode`] first. Any failure here means
/// the stream is unsynchronized and the connection must be closed.
pub fn decode(buf: &mut BytesMut) -> Result<Message> {
    let total_len = buf.get_u32() as usize;
    let mtype_raw = buf.get_u32();
    let id_len = buf.get_u32() as usize;
    let body_len = total_len
        .checked_sub(MTYPE_FIELD + IDLEN_FIELD + id_len)
        .ok_or(HubError::InvalidMessage("frame shorter than its id field"))?;

    let id_bytes = buf.split_to(id_len);
    let id = std::str::from_utf8(&id_bytes)
        .map_err(|_| HubError::InvalidMessage("request id is not valid UTF-8"))?
        .to_string();
    let body_bytes = buf.split_to(body_len);

    let mtype =
        MType::from_wire(mtype_raw).ok_or(HubError::UnknownMessageType(mtype_raw))?;
    let body = Body::from_json(mtype, &body_bytes)?;

    let msg = Message { id, body };
    msg.check().map_err(HubError::InvalidMessage)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fields::{RCode, TopicOp};
    use crate::protocol::messages::{RpcRequest, TopicRequest, TopicResponse};
    use serde_json::json;

    fn sample_request() -> Message {
        Message::request(Body::RpcRequest(RpcRequest {
            method: "Add".to_string(),
            parameters: json!({"num1": 1, "num2": 2}),
        }))
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let msg = sample_request();
        let mut buf = BytesMut::from(&encode(&msg).unwrap()[..]);

        assert!(can_decode(&buf));
        let decoded = decode(&mut buf).unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_concatenated_frames_decode_in_order() {
        let first = sample_request();
        let second = Message::request(Body::TopicRequest(TopicRequest {
            topic_key: "news".to_string(),
            optype: TopicOp::Publish,
            topic_msg: Some("hello".to_string()),
        }));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&first).unwrap());
        buf.extend_from_slice(&encode(&second).unwrap());

        assert_eq!(decode(&mut buf).unwrap(), first);
        assert_eq!(decode(&mut buf).unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_not_decodable() {
        let frame = encode(&sample_request()).unwrap();
        for cut in [0, 3, 4, frame.len() - 1] {
            let buf = BytesMut::from(&frame[..cut]);
            assert!(!can_decode(&buf), "cut at {cut} should not decode");
        }
        let buf = BytesMut::from(&frame[..]);
        assert!(can_decode(&buf));
    }

    #[test]
    fn test_unknown_mtype_fails_decode() {
        let msg = Message::reply(
            "rid-1",
            Body::TopicResponse(TopicResponse { rcode: RCode::Ok }),
        );
        let frame = encode(&msg).unwrap();
        let mut raw = BytesMut::from(&frame[..]);
        // Overwrite the mtype field with a value outside the enumeration.
        raw[4..8].copy_from_slice(&99u32.to_be_bytes());

        match decode(&mut raw) {
            Err(HubError::UnknownMessageType(99)) => {}
            other => panic!("expected unknown-mtype error, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_fails_decode() {
        let msg = sample_request();
        let frame = encode(&msg).unwrap();
        let mut raw = BytesMut::from(&frame[..]);
        let last = raw.len() - 1;
        raw[last] = b'{';

        assert!(decode(&mut raw).is_err());
    }

    #[test]
    fn test_id_longer_than_frame_fails_decode() {
        let mut raw = BytesMut::new();
        raw.put_u32(8 + 2); // total_len admits a 2-byte tail...
        raw.put_u32(MType::TopicResponse.to_wire());
        raw.put_u32(100); // ...but claims a 100-byte id
        raw.put_slice(&[0u8; 100]);

        assert!(decode(&mut raw).is_err());
    }
}
