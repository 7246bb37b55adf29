//! # Frames
//!
//! Length-delimited framing for transporters that run over a byte stream
//! (Unix sockets, TCP, in-memory duplex pipes).
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [Version(1)] [ChannelLen(2)] [PayloadLen(4)] [Channel(C)] [Payload(N)]
//! ```
//!
//! Lengths are validated before any allocation; a payload longer than
//! `MAX_PAYLOAD_SIZE` is rejected outright.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{FRAME_VERSION, MAGIC_BYTES, MAX_PAYLOAD_SIZE};
use crate::error::{BridgeError, Result};

const HEADER_LEN: usize = 4 + 1 + 2 + 4;

/// One transporter message on a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub channel: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: impl Into<String>, payload: Bytes) -> Self {
        Self {
            version: FRAME_VERSION,
            channel: channel.into(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.channel.len() + self.payload.len());
        write_frame(self, &mut buf);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = BytesMut::from(data);
        match FrameCodec.decode(&mut buf)? {
            Some(frame) => Ok(frame),
            None => Err(BridgeError::InvalidHeader),
        }
    }
}

fn write_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(HEADER_LEN + frame.channel.len() + frame.payload.len());
    dst.put_slice(&MAGIC_BYTES);
    dst.put_u8(frame.version);
    dst.put_u16(frame.channel.len() as u16);
    dst.put_u32(frame.payload.len() as u32);
    dst.put_slice(frame.channel.as_bytes());
    dst.put_slice(&frame.payload);
}

/// Tokio codec for [`Frame`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        if src[0..4] != MAGIC_BYTES {
            return Err(BridgeError::InvalidHeader);
        }
        let version = src[4];
        if version != FRAME_VERSION {
            return Err(BridgeError::UnsupportedVersion(version));
        }
        let channel_len = u16::from_be_bytes([src[5], src[6]]) as usize;
        let payload_len = u32::from_be_bytes([src[7], src[8], src[9], src[10]]) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(BridgeError::OversizedPacket(payload_len));
        }

        let total = HEADER_LEN + channel_len + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let channel = src.split_to(channel_len);
        let channel = String::from_utf8(channel.to_vec()).map_err(|_| BridgeError::InvalidHeader)?;
        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Frame {
            version,
            channel,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = BridgeError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(BridgeError::OversizedPacket(frame.payload.len()));
        }
        if frame.channel.len() > u16::MAX as usize {
            return Err(BridgeError::Transport(format!(
                "channel name too long: {} bytes",
                frame.channel.len()
            )));
        }
        write_frame(&frame, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_partial_frame_waits_for_more() {
        let bytes = Frame::new("ns.node-2", Bytes::from_static(b"hello")).to_bytes();
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 2]);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[bytes.len() - 2..]);
        let frame = FrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.channel, "ns.node-2");
        assert_eq!(&frame.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        FrameCodec
            .encode(Frame::new("a", Bytes::from_static(b"1")), &mut buf)
            .unwrap();
        FrameCodec
            .encode(Frame::new("b", Bytes::from_static(b"22")), &mut buf)
            .unwrap();

        let first = FrameCodec.decode(&mut buf).unwrap().unwrap();
        let second = FrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!((first.channel.as_str(), &first.payload[..]), ("a", &b"1"[..]));
        assert_eq!((second.channel.as_str(), &second.payload[..]), ("b", &b"22"[..]));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Frame::new("a", Bytes::new()).to_bytes();
        bytes[0] = 0xFF;
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(BridgeError::InvalidHeader)
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = Frame::new("a", Bytes::new()).to_bytes();
        bytes[4] = 99;
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(BridgeError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_oversized_claim_rejected_before_allocation() {
        let mut bytes = Frame::new("a", Bytes::new()).to_bytes();
        bytes[7..11].copy_from_slice(&(20_000_000u32).to_be_bytes());
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(BridgeError::OversizedPacket(20_000_000))
        ));
    }

    #[test]
    fn test_truncated_frame_is_invalid() {
        assert!(matches!(
            Frame::from_bytes(&[0x53, 0x42]),
            Err(BridgeError::InvalidHeader)
        ));
    }
}
