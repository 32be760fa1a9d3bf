//! Length-prefixed framing for the control-plane stream.
//!
//! Generic over any `Serialize`/`DeserializeOwned` type via JSON, since
//! the control plane carries two different enums depending on direction
//! (`ShimEvent` vs. `Command`).
//!
//! Deliberately synchronous and buffer-based — `dst-wire` has no
//! `tokio` dependency. The async read/write loop around these functions
//! lives in `dst-controller` and `dst-shim`, both of which already
//! depend on `tokio` for their own reasons.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::WireError;

/// Size in bytes of the frame's length header.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Frames larger than this are rejected rather than buffered, bounding
/// memory use against a misbehaving peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serializes `value` as JSON and appends it to `buf` as a
/// length-prefixed frame (`u32` big-endian length, then body).
pub fn encode_frame<T: Serialize>(value: &T, buf: &mut BytesMut) -> Result<(), WireError> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    buf.reserve(FRAME_HEADER_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(())
}

/// Attempts to decode one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a full frame — the
/// caller should read more bytes and retry. On success, the consumed
/// bytes are advanced past in `buf` so repeated calls drain a stream of
/// back-to-back frames.
pub fn try_decode_frame<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, WireError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes(buf[..FRAME_HEADER_SIZE].try_into().unwrap()) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    let body = buf.split_to(len);
    let value = serde_json::from_slice(&body)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Command, ShimEvent};

    #[test]
    fn round_trips_a_single_frame() {
        let mut buf = BytesMut::new();
        let ev = ShimEvent::ProcessStarted {
            id: "p1".to_string(),
            addr: "127.0.0.1:9000".to_string(),
        };
        encode_frame(&ev, &mut buf).unwrap();

        let decoded: ShimEvent = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, ev);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_returns_none_without_consuming() {
        let mut buf = BytesMut::new();
        encode_frame(
            &Command::FireTimer {
                id: "p1-t1".to_string(),
                name: "retry".to_string(),
            },
            &mut buf,
        )
        .unwrap();

        let mut truncated = buf.split_to(buf.len() - 1);
        let result: Option<Command> = try_decode_frame(&mut truncated).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn drains_back_to_back_frames() {
        let mut buf = BytesMut::new();
        let a = Command::FireTimer {
            id: "a".to_string(),
            name: "x".to_string(),
        };
        let b = Command::FireTimer {
            id: "b".to_string(),
            name: "y".to_string(),
        };
        encode_frame(&a, &mut buf).unwrap();
        encode_frame(&b, &mut buf).unwrap();

        let first: Command = try_decode_frame(&mut buf).unwrap().unwrap();
        let second: Command = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        let result: Result<Option<Command>, _> = try_decode_frame(&mut buf);
        assert!(matches!(result, Err(WireError::FrameTooLarge { .. })));
    }
}
