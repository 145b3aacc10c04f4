//! # Control channel framing.
//!
//! [`ControlCodec`] frames [`Message`]s as a 4-byte big-endian length prefix
//! followed by the JSON body, on top of [`LengthDelimitedCodec`].
//!
//! ## Rules
//! - Frames above [`MAX_FRAME_LEN`] are rejected (the connection is dropped).
//! - A malformed body fails with [`ControlError::Codec`].

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::control::message::Message;
use crate::error::ControlError;

/// Maximum accepted frame body (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length-prefixed JSON codec.
pub struct ControlCodec {
    inner: LengthDelimitedCodec,
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Decoder for ControlCodec {
    type Item = Message;
    type Error = ControlError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ControlError> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for ControlCodec {
    type Error = ControlError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), ControlError> {
        let body = serde_json::to_vec(&msg)?;
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn waits_for_complete_frame() {
        let mut codec = ControlCodec::new();
        let mut full = BytesMut::new();
        codec.encode(Message::event("gc:start", None), &mut full).unwrap();

        let mut partial = BytesMut::new();
        partial.extend_from_slice(&full[..full.len() - 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 3..]);
        let msg = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(msg.name.as_deref(), Some("gc:start"));
        assert!(partial.is_empty());
    }

    #[test]
    fn rejects_garbage_body() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.extend_from_slice(b"{x}");
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.as_label(), "control_codec");
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }
}
