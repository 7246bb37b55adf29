//! # Packets
//!
//! The wire unit exchanged between brokers.
//!
//! Two shapes live here:
//! - [`WirePacket`]: the flat, serde-friendly record that actually crosses the
//!   transporter. Every field except the type tag is optional.
//! - [`Packet`]: the validated, typed form the rest of the crate works with.
//!
//! Converting a `WirePacket` into a `Packet` is the only place the required
//! fields of each packet type are checked. A missing field or an unknown type
//! tag yields [`BridgeError::MalformedPacket`].
//!
//! ## Wire Shape
//! ```text
//! { type, callId, originNode,
//!   action?, meta?,            REQUEST
//!   streamed?, acks?, data?,   REQUEST / RESPONSE
//!   direction?,                STREAM_*
//!   payload?,                  STREAM_DATA
//!   error? }                   STREAM_ERROR / failed RESPONSE
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::core::ids::{CallId, NodeId};
use crate::error::{constants, BridgeError, Result, StreamError};
use crate::stream::Direction;

/// Opaque call metadata.
pub type Meta = Map<String, Value>;

/// Packet type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Request = 1,
    Response = 2,
    StreamData = 3,
    StreamEnd = 4,
    StreamError = 5,
    StreamAck = 6,
}

impl PacketType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PacketType::Request),
            2 => Some(PacketType::Response),
            3 => Some(PacketType::StreamData),
            4 => Some(PacketType::StreamEnd),
            5 => Some(PacketType::StreamError),
            6 => Some(PacketType::StreamAck),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Request => "REQUEST",
            PacketType::Response => "RESPONSE",
            PacketType::StreamData => "STREAM_DATA",
            PacketType::StreamEnd => "STREAM_END",
            PacketType::StreamError => "STREAM_ERROR",
            PacketType::StreamAck => "STREAM_ACK",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error carried by `STREAM_ERROR` and failed `RESPONSE` packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
    pub node_id: String,
}

impl ErrorDescriptor {
    pub fn new(message: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node_id: node_id.into(),
        }
    }
}

impl From<ErrorDescriptor> for StreamError {
    fn from(desc: ErrorDescriptor) -> Self {
        StreamError::remote(desc.message, desc.node_id)
    }
}

/// Flat record that crosses the transporter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WirePacket {
    #[serde(rename = "type")]
    pub kind: u8,
    pub call_id: Option<String>,
    pub origin_node: Option<String>,
    pub action: Option<String>,
    /// JSON-encoded metadata map
    pub meta: Option<Vec<u8>>,
    pub streamed: Option<bool>,
    pub acks: Option<bool>,
    pub direction: Option<u8>,
    /// JSON-encoded inline params or result
    pub data: Option<Vec<u8>>,
    pub payload: Option<Bytes>,
    pub error: Option<ErrorDescriptor>,
}

/// Params of a request or value of a response, as announced on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Inline(Value),
    /// The value follows as a stream; `acks` asks the consumer to acknowledge chunks.
    Streamed { acks: bool },
}

/// Outcome announced by a `RESPONSE`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Ok(Body),
    Failed(ErrorDescriptor),
}

/// Typed packet contents.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    Request {
        action: String,
        meta: Meta,
        params: Body,
    },
    Response(ResponseBody),
    StreamData {
        direction: Direction,
        payload: Bytes,
    },
    StreamEnd {
        direction: Direction,
    },
    StreamError {
        direction: Direction,
        error: ErrorDescriptor,
    },
    StreamAck {
        direction: Direction,
    },
}

/// A validated packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub call_id: CallId,
    pub origin: NodeId,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(call_id: CallId, origin: NodeId, body: PacketBody) -> Self {
        Self {
            call_id,
            origin,
            body,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self.body {
            PacketBody::Request { .. } => PacketType::Request,
            PacketBody::Response(_) => PacketType::Response,
            PacketBody::StreamData { .. } => PacketType::StreamData,
            PacketBody::StreamEnd { .. } => PacketType::StreamEnd,
            PacketBody::StreamError { .. } => PacketType::StreamError,
            PacketBody::StreamAck { .. } => PacketType::StreamAck,
        }
    }

    /// Stream direction for `STREAM_*` packets.
    pub fn direction(&self) -> Option<Direction> {
        match self.body {
            PacketBody::StreamData { direction, .. }
            | PacketBody::StreamEnd { direction }
            | PacketBody::StreamError { direction, .. }
            | PacketBody::StreamAck { direction } => Some(direction),
            _ => None,
        }
    }

    /// Flatten into the wire record.
    pub fn to_wire(&self) -> Result<WirePacket> {
        let mut wire = WirePacket {
            kind: self.packet_type().tag(),
            call_id: Some(self.call_id.to_string()),
            origin_node: Some(self.origin.to_string()),
            ..WirePacket::default()
        };

        match &self.body {
            PacketBody::Request {
                action,
                meta,
                params,
            } => {
                wire.action = Some(action.clone());
                wire.meta = Some(encode_json(&Value::Object(meta.clone()))?);
                write_body(&mut wire, params)?;
            }
            PacketBody::Response(ResponseBody::Ok(body)) => write_body(&mut wire, body)?,
            PacketBody::Response(ResponseBody::Failed(error)) => {
                wire.error = Some(error.clone());
            }
            PacketBody::StreamData { direction, payload } => {
                wire.direction = Some(direction.tag());
                wire.payload = Some(payload.clone());
            }
            PacketBody::StreamEnd { direction } | PacketBody::StreamAck { direction } => {
                wire.direction = Some(direction.tag());
            }
            PacketBody::StreamError { direction, error } => {
                wire.direction = Some(direction.tag());
                wire.error = Some(error.clone());
            }
        }

        Ok(wire)
    }
}

impl TryFrom<WirePacket> for Packet {
    type Error = BridgeError;

    fn try_from(wire: WirePacket) -> Result<Self> {
        let kind = PacketType::from_tag(wire.kind).ok_or_else(|| {
            BridgeError::MalformedPacket(format!(
                "{}: {}",
                constants::ERR_UNKNOWN_PACKET_TYPE,
                wire.kind
            ))
        })?;
        let call_id = wire
            .call_id
            .map(CallId::new)
            .ok_or_else(|| missing(kind, "callId"))?;
        let origin = wire
            .origin_node
            .map(NodeId::new)
            .ok_or_else(|| missing(kind, "originNode"))?;

        let body = match kind {
            PacketType::Request => {
                let action = wire.action.ok_or_else(|| {
                    BridgeError::MalformedPacket(constants::ERR_MISSING_ACTION.to_string())
                })?;
                let meta = match wire.meta {
                    Some(raw) => match decode_json(&raw)? {
                        Value::Object(map) => map,
                        Value::Null => Meta::new(),
                        _ => {
                            return Err(BridgeError::MalformedPacket(
                                "meta must be a map".to_string(),
                            ))
                        }
                    },
                    None => Meta::new(),
                };
                let params = read_body(kind, wire.streamed, wire.acks, wire.data)?;
                PacketBody::Request {
                    action,
                    meta,
                    params,
                }
            }
            PacketType::Response => match wire.error {
                Some(error) => PacketBody::Response(ResponseBody::Failed(error)),
                None => PacketBody::Response(ResponseBody::Ok(read_body(
                    kind,
                    wire.streamed,
                    wire.acks,
                    wire.data,
                )?)),
            },
            PacketType::StreamData => PacketBody::StreamData {
                direction: read_direction(wire.direction)?,
                payload: wire.payload.ok_or_else(|| {
                    BridgeError::MalformedPacket(constants::ERR_MISSING_PAYLOAD.to_string())
                })?,
            },
            PacketType::StreamEnd => PacketBody::StreamEnd {
                direction: read_direction(wire.direction)?,
            },
            PacketType::StreamError => PacketBody::StreamError {
                direction: read_direction(wire.direction)?,
                error: wire.error.ok_or_else(|| {
                    BridgeError::MalformedPacket(constants::ERR_MISSING_ERROR.to_string())
                })?,
            },
            PacketType::StreamAck => PacketBody::StreamAck {
                direction: read_direction(wire.direction)?,
            },
        };

        Ok(Packet {
            call_id,
            origin,
            body,
        })
    }
}

fn missing(kind: PacketType, field: &str) -> BridgeError {
    BridgeError::MalformedPacket(format!("{kind} packet without {field}"))
}

fn write_body(wire: &mut WirePacket, body: &Body) -> Result<()> {
    match body {
        Body::Inline(value) => {
            wire.streamed = Some(false);
            wire.data = Some(encode_json(value)?);
        }
        Body::Streamed { acks } => {
            wire.streamed = Some(true);
            wire.acks = Some(*acks);
        }
    }
    Ok(())
}

fn read_body(
    kind: PacketType,
    streamed: Option<bool>,
    acks: Option<bool>,
    data: Option<Vec<u8>>,
) -> Result<Body> {
    if streamed.unwrap_or(false) {
        return Ok(Body::Streamed {
            acks: acks.unwrap_or(false),
        });
    }
    let raw = data.ok_or_else(|| missing(kind, "data"))?;
    Ok(Body::Inline(decode_json(&raw)?))
}

fn read_direction(tag: Option<u8>) -> Result<Direction> {
    tag.and_then(Direction::from_tag).ok_or_else(|| {
        BridgeError::MalformedPacket(constants::ERR_MISSING_DIRECTION.to_string())
    })
}

fn encode_json(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BridgeError::SerializeError(e.to_string()))
}

fn decode_json(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice(raw).map_err(|e| BridgeError::MalformedPacket(e.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use serde_json::json;

    fn header(kind: PacketType) -> WirePacket {
        WirePacket {
            kind: kind.tag(),
            call_id: Some("node-1:1".into()),
            origin_node: Some("node-1".into()),
            ..WirePacket::default()
        }
    }

    #[test]
    fn test_unknown_type_tag_is_malformed() {
        let wire = WirePacket {
            kind: 42,
            ..header(PacketType::Request)
        };
        let err = Packet::try_from(wire).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedPacket(_)));
    }

    #[test]
    fn test_request_requires_action() {
        let mut wire = header(PacketType::Request);
        wire.data = Some(b"null".to_vec());
        assert!(matches!(
            Packet::try_from(wire),
            Err(BridgeError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_stream_data_requires_payload_and_direction() {
        let mut wire = header(PacketType::StreamData);
        wire.direction = Some(Direction::Upload.tag());
        assert!(Packet::try_from(wire.clone()).is_err());

        wire.direction = None;
        wire.payload = Some(Bytes::from_static(b"chunk"));
        assert!(Packet::try_from(wire).is_err());
    }

    #[test]
    fn test_missing_call_id_is_malformed() {
        let mut wire = header(PacketType::StreamEnd);
        wire.direction = Some(Direction::Download.tag());
        wire.call_id = None;
        assert!(matches!(
            Packet::try_from(wire),
            Err(BridgeError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_streamed_request_ignores_data() {
        let packet = Packet::new(
            CallId::from("node-1:7"),
            NodeId::from("node-1"),
            PacketBody::Request {
                action: "file.save".into(),
                meta: Meta::new(),
                params: Body::Streamed { acks: true },
            },
        );
        let wire = packet.to_wire().unwrap();
        assert_eq!(wire.streamed, Some(true));
        assert!(wire.data.is_none());
        assert_eq!(Packet::try_from(wire).unwrap(), packet);
    }

    #[test]
    fn test_failed_response_keeps_error() {
        let packet = Packet::new(
            CallId::from("node-1:3"),
            NodeId::from("node-2"),
            PacketBody::Response(ResponseBody::Failed(ErrorDescriptor::new("boom", "node-2"))),
        );
        let back = Packet::try_from(packet.to_wire().unwrap()).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn test_request_meta_must_be_map() {
        let mut wire = header(PacketType::Request);
        wire.action = Some("file.get".into());
        wire.meta = Some(serde_json::to_vec(&json!([1, 2])).unwrap());
        wire.data = Some(b"null".to_vec());
        assert!(Packet::try_from(wire).is_err());
    }

    #[test]
    fn test_direction_accessor() {
        let packet = Packet::new(
            CallId::from("c"),
            NodeId::from("n"),
            PacketBody::StreamAck {
                direction: Direction::Download,
            },
        );
        assert_eq!(packet.direction(), Some(Direction::Download));
        assert_eq!(packet.packet_type(), PacketType::StreamAck);
        assert_eq!(packet.packet_type().to_string(), "STREAM_ACK");
    }
}
