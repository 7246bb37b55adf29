//! # Packet Codec
//!
//! The only component that touches raw transporter payloads.
//!
//! ## Payload Layout
//! ```text
//! [Format(1)] [Flags(1)] [Body(N)]
//! ```
//! - **Format**: serialization format byte (see [`SerializationFormat`])
//! - **Flags**: compression applied to the body (`0` = none)
//! - **Body**: the serialized [`WirePacket`]
//!
//! Every decode failure, whatever its cause, is reported as
//! [`BridgeError::MalformedPacket`] so callers can drop poison messages with a
//! single match arm.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{TransportConfig, MAX_PAYLOAD_SIZE};
use crate::core::packet::{Packet, WirePacket};
use crate::core::serialization::{MultiFormat, SerializationFormat};
use crate::error::{constants, BridgeError, Result};
use crate::utils::compression::{decompress, maybe_compress_adaptive, CompressionKind};

const HEADER_LEN: usize = 2;

/// Encodes packets for the transporter and decodes what arrives.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    format: SerializationFormat,
    compression: Option<CompressionKind>,
    compression_threshold: usize,
    max_payload_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self {
            format: SerializationFormat::default(),
            compression: None,
            compression_threshold: 512,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl PacketCodec {
    pub fn new(format: SerializationFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            format: config.serialization,
            compression: config.compression,
            compression_threshold: config.compression_threshold_bytes,
            max_payload_size: config.max_payload_size,
        }
    }

    /// Enable body compression above `threshold` bytes.
    pub fn with_compression(mut self, kind: CompressionKind, threshold: usize) -> Self {
        self.compression = Some(kind);
        self.compression_threshold = threshold;
        self
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let body = packet.to_wire()?.serialize_format(self.format)?;

        let (body, flags) = match self.compression {
            Some(kind) => match maybe_compress_adaptive(&body, kind, self.compression_threshold)? {
                (out, true) => (out, kind.flag()),
                (out, false) => (out, 0),
            },
            None => (body, 0),
        };

        let total = HEADER_LEN + body.len();
        if total > self.max_payload_size {
            return Err(BridgeError::OversizedPacket(total));
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(self.format.format_byte());
        buf.put_u8(flags);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Packet> {
        if payload.len() < HEADER_LEN {
            return Err(BridgeError::MalformedPacket(
                constants::ERR_EMPTY_PAYLOAD.to_string(),
            ));
        }
        if payload.len() > self.max_payload_size {
            return Err(BridgeError::MalformedPacket(format!(
                "payload of {} bytes exceeds limit",
                payload.len()
            )));
        }

        let format = SerializationFormat::from_byte(payload[0]).ok_or_else(|| {
            BridgeError::MalformedPacket(format!("unknown format byte: {:#04x}", payload[0]))
        })?;

        let body = &payload[HEADER_LEN..];
        let wire = match payload[1] {
            0 => WirePacket::deserialize_format(body, format),
            flags => {
                let kind = CompressionKind::from_flag(flags).ok_or_else(|| {
                    BridgeError::MalformedPacket(format!("unknown flags: {flags:#04x}"))
                })?;
                let inflated = decompress(body, kind)
                    .map_err(|e| BridgeError::MalformedPacket(e.to_string()))?;
                WirePacket::deserialize_format(&inflated, format)
            }
        }
        .map_err(|e| match e {
            BridgeError::MalformedPacket(_) => e,
            other => BridgeError::MalformedPacket(other.to_string()),
        })?;

        Packet::try_from(wire)
    }
}
