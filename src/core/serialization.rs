//! # Serialization Formats
//!
//! Abstraction over the serialization formats a packet may be written in.
//! Supports bincode (default), JSON (debugging/interop), and MessagePack (compact encoding).
//!
//! Every encoded packet starts with a format byte, so a receiver decodes
//! whatever format the sender chose without prior agreement.
//!
//! ## Performance Characteristics
//! - **Bincode**: fastest, binary
//! - **MessagePack**: compact, binary
//! - **JSON**: human-readable, text

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
    /// Compact binary format (MessagePack, efficient)
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl SerializationFormat {
    /// Get the format identifier byte for wire protocol
    pub fn format_byte(self) -> u8 {
        match self {
            SerializationFormat::Bincode => 0x01,
            SerializationFormat::Json => 0x02,
            SerializationFormat::MessagePack => 0x03,
        }
    }

    /// Detect format from identifier byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SerializationFormat::Bincode),
            0x02 => Some(SerializationFormat::Json),
            0x03 => Some(SerializationFormat::MessagePack),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }
}

/// Trait for types that support multiple serialization formats
pub trait MultiFormat: Serialize + for<'de> Deserialize<'de> + Sized {
    /// Serialize to bytes using the specified format
    fn serialize_format(&self, format: SerializationFormat) -> Result<Vec<u8>> {
        match format {
            SerializationFormat::Bincode => {
                bincode::serialize(self).map_err(|e| BridgeError::SerializeError(e.to_string()))
            }
            SerializationFormat::Json => {
                serde_json::to_vec(self).map_err(|e| BridgeError::SerializeError(e.to_string()))
            }
            SerializationFormat::MessagePack => {
                rmp_serde::to_vec(self).map_err(|e| BridgeError::SerializeError(e.to_string()))
            }
        }
    }

    /// Deserialize from bytes using the specified format
    fn deserialize_format(data: &[u8], format: SerializationFormat) -> Result<Self> {
        match format {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| BridgeError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| BridgeError::DeserializeError(e.to_string())),
            SerializationFormat::MessagePack => rmp_serde::from_slice(data)
                .map_err(|e| BridgeError::DeserializeError(e.to_string())),
        }
    }
}

impl MultiFormat for crate::core::packet::WirePacket {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::{PacketType, WirePacket};
    use bytes::Bytes;

    fn sample() -> WirePacket {
        WirePacket {
            kind: PacketType::StreamData.tag(),
            call_id: Some("node-1:1".into()),
            origin_node: Some("node-1".into()),
            direction: Some(1),
            payload: Some(Bytes::from_static(b"first chunk")),
            ..WirePacket::default()
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_format_byte_roundtrip() {
        for format in &[
            SerializationFormat::Bincode,
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
        ] {
            let byte = format.format_byte();
            let recovered = SerializationFormat::from_byte(byte).expect("valid format byte");
            assert_eq!(*format, recovered);
        }
    }

    #[test]
    fn test_unknown_format_byte() {
        assert_eq!(SerializationFormat::from_byte(0x00), None);
        assert_eq!(SerializationFormat::from_byte(0xFF), None);
    }

    #[test]
    fn test_default_format() {
        assert_eq!(SerializationFormat::default(), SerializationFormat::Bincode);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_every_format_carries_payload() {
        for format in [
            SerializationFormat::Bincode,
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
        ] {
            let bytes = sample().serialize_format(format).expect("serialize");
            let back = WirePacket::deserialize_format(&bytes, format).expect("deserialize");
            assert_eq!(back, sample(), "format {}", format.name());
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_format_sizes() {
        let bincode_size = sample()
            .serialize_format(SerializationFormat::Bincode)
            .expect("bincode")
            .len();
        let json_size = sample()
            .serialize_format(SerializationFormat::Json)
            .expect("json")
            .len();

        // Binary encoding should be more compact than JSON
        assert!(bincode_size < json_size);
    }
}
