//! Tokio codec for the control-channel framing.
//!
//! A frame is a 2-byte big-endian length followed by exactly that many
//! bytes of UTF-8 JSON. The decoder leaves partial frames buffered
//! across reads; an announced length beyond the frame-size limit is a
//! protocol violation and fatal to the session rather than silently
//! skipped.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Command, Reply};
use latchkey_core::{Error, Result};

/// Maximum payload bytes in one frame.
///
/// Large enough for the biggest legitimate message (a transfer chunk
/// plus JSON overhead), small enough that a hostile peer cannot make
/// us buffer much.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Codec for the device side of the control channel: decodes inbound
/// [`Command`]s and encodes outbound [`Reply`]s.
#[derive(Debug)]
pub struct DoorCodec {
    max_frame_size: usize,
}

impl DoorCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for DoorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DoorCodec {
    type Item = Command;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[0], src[1]]) as usize;
        if length > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: length,
                max_size: self.max_frame_size,
            });
        }

        if src.len() < 2 + length {
            // partial frame stays buffered until more bytes arrive
            src.reserve(2 + length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(2 + length);
        Command::from_json(&frame[2..]).map(Some)
    }
}

impl Encoder<Reply> for DoorCodec {
    type Error = Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: payload.len(),
                max_size: self.max_frame_size,
            });
        }

        dst.reserve(2 + payload.len());
        dst.put_u16(payload.len() as u16);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut codec = DoorCodec::new();
        let mut buf = BytesMut::from(&frame(br#"{"cmd":"ping"}"#)[..]);

        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd.name(), "ping");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = DoorCodec::new();
        let bytes = frame(br#"{"cmd":"state_query"}"#);

        let mut buf = BytesMut::from(&bytes[..bytes.len() - 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[bytes.len() - 3..]);
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd, Command::StateQuery);
    }

    #[test]
    fn test_decode_length_prefix_split_across_reads() {
        let mut codec = DoorCodec::new();
        let bytes = frame(br#"{"cmd":"keepalive"}"#);

        let mut buf = BytesMut::from(&bytes[..1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[1..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::Keepalive));
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = DoorCodec::new();
        let mut bytes = frame(br#"{"cmd":"ping"}"#);
        bytes.extend_from_slice(&frame(br#"{"cmd":"metrics_query"}"#));
        let mut buf = BytesMut::from(&bytes[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().name(), "ping");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Command::MetricsQuery)
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_oversized_length_is_fatal() {
        let mut codec = DoorCodec::with_max_frame_size(16);
        // announce a 17-byte payload without sending it
        let mut buf = BytesMut::from(&17u16.to_be_bytes()[..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(Error::FrameTooLarge {
                size: 17,
                max_size: 16
            })
        ));
    }

    #[test]
    fn test_decode_unknown_command() {
        let mut codec = DoorCodec::new();
        let mut buf = BytesMut::from(&frame(br#"{"cmd":"warp_drive"}"#)[..]);

        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd, Command::Unknown("warp_drive".to_string()));
    }

    #[test]
    fn test_encode_length_prefix() {
        let mut codec = DoorCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Reply::Hello {
                    clientid: "doorman-abc123".to_string(),
                    password: "pw".to_string(),
                },
                &mut buf,
            )
            .unwrap();

        let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        assert_eq!(length, buf.len() - 2);

        let v: serde_json::Value = serde_json::from_slice(&buf[2..]).unwrap();
        assert_eq!(v["cmd"], "hello");
    }

    #[test]
    fn test_encode_oversized_reply_rejected() {
        let mut codec = DoorCodec::with_max_frame_size(32);
        let mut buf = BytesMut::new();
        let result = codec.encode(
            Reply::FileDirInfo {
                filenames: vec!["a".repeat(64)],
            },
            &mut buf,
        );
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_limit_covers_token_auth() {
        // worst-case token_auth payload: 1024 data bytes hex-encoded plus
        // attributes still fits the frame limit
        assert!(MAX_FRAME_SIZE > latchkey_core::constants::MAX_TOKEN_DATA * 2 + 512);
    }

    proptest! {
        // any split of the byte stream decodes to the same command
        #[test]
        fn prop_decode_is_split_invariant(split_points in proptest::collection::vec(0usize..=36, 0..6)) {
            let bytes = frame(br#"{"cmd":"ping","seq":12345678901234}"#);
            let mut splits: Vec<usize> = split_points.iter().map(|p| p % bytes.len()).collect();
            splits.sort_unstable();
            splits.dedup();

            let mut codec = DoorCodec::new();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            let mut start = 0;
            for &end in splits.iter().chain(std::iter::once(&bytes.len())) {
                buf.extend_from_slice(&bytes[start..end]);
                start = end;
                while let Some(cmd) = codec.decode(&mut buf).unwrap() {
                    decoded.push(cmd);
                }
            }

            prop_assert_eq!(decoded.len(), 1);
            prop_assert_eq!(decoded[0].name(), "ping");
        }
    }
}
