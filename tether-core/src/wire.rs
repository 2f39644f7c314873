//! Reference codec. Framing: length-prefix (4 bytes LE) + bincode envelope
//! whose body is the JSON encoding of the packet fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{ConnectionState, PacketEvent, PacketMeta};

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 2 * 1024 * 1024; // 2 MiB

#[derive(Serialize, Deserialize)]
struct Envelope {
    name: String,
    state: ConnectionState,
    body: String,
}

/// Encode a packet into a single frame.
pub fn encode_packet(meta: &PacketMeta, fields: &Value) -> Result<Vec<u8>, FrameEncodeError> {
    let envelope = Envelope {
        name: meta.name.clone(),
        state: meta.state,
        body: serde_json::to_string(fields).map_err(FrameEncodeError::Fields)?,
    };
    let payload = bincode::serialize(&envelope).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[source] bincode::Error),
    #[error("field encode error: {0}")]
    Fields(#[source] serde_json::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Length of the frame body announced by a 4-byte prefix, or `TooLarge`.
pub fn frame_len(prefix: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Decode one frame from the front of `bytes`. Returns the packet (whose `raw` is
/// exactly the consumed frame) and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(PacketEvent, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = frame_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let frame = &bytes[..LEN_SIZE + len];
    let envelope: Envelope =
        bincode::deserialize(&frame[LEN_SIZE..]).map_err(FrameDecodeError::Decode)?;
    let fields: Value = serde_json::from_str(&envelope.body).map_err(FrameDecodeError::Fields)?;
    let packet = PacketEvent {
        meta: PacketMeta::new(envelope.name, envelope.state),
        fields,
        raw: frame.to_vec(),
    };
    Ok((packet, frame.len()))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[source] bincode::Error),
    #[error("field decode error: {0}")]
    Fields(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(message: &str) -> Vec<u8> {
        encode_packet(&PacketMeta::play("chat"), &json!({ "message": message })).unwrap()
    }

    #[test]
    fn decoded_raw_is_the_frame() {
        let frame = chat("hello");
        let (packet, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(packet.raw, frame);
        assert_eq!(packet.meta, PacketMeta::play("chat"));
        assert_eq!(packet.fields, json!({ "message": "hello" }));
    }

    #[test]
    fn partial_read_need_more() {
        let frame = chat("hello");
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let a = chat("a");
        let b = encode_packet(
            &PacketMeta::new("disconnect", ConnectionState::Login),
            &json!({ "reason": "bye" }),
        )
        .unwrap();
        let mut buf = a.clone();
        buf.extend_from_slice(&b);
        let (first, n1) = decode_frame(&buf).unwrap();
        let (second, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(first.raw, a);
        assert_eq!(n2, b.len());
        assert_eq!(second.meta.state, ConnectionState::Login);
    }

    #[test]
    fn oversized_prefix_rejected() {
        let prefix = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(matches!(frame_len(prefix), Err(FrameDecodeError::TooLarge)));
    }
}
