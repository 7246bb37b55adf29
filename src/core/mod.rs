//! # Core Protocol Components
//!
//! Identifiers, packets, and the codecs that turn them into bytes.
//!
//! ## Components
//! - **Ids**: typed node and call identifiers
//! - **Packet**: the six packet shapes used for calls and streaming
//! - **Codec**: packet <-> transporter payload, with optional compression
//! - **Frame**: length-delimited framing for byte-stream transporters
//! - **Serialization**: bincode / JSON / MessagePack selection
//!
//! ## Security
//! - Payload sizes are bounded before allocation
//! - Malformed input surfaces as an error, never a panic

pub mod codec;
pub mod frame;
pub mod ids;
pub mod packet;
pub mod serialization;
