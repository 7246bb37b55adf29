//! # Stream Bridge
//!
//! Live byte streams as remote call parameters and results.
//!
//! Nodes talk through a message-oriented [`transport::Transporter`] that has
//! no notion of a stream. The bridge cuts a local stream into ordered
//! `STREAM_DATA` packets followed by one `STREAM_END` or `STREAM_ERROR`, and
//! rebuilds it on the far side with the same chunk boundaries, the same
//! completion signal, and the producer's error annotated with its node.
//!
//! ## Layers
//! - [`core`]: ids, packets, packet codec, byte-stream framing
//! - [`stream`]: byte streams, proxies, registry, packetizer, reconstructor
//! - [`protocol`]: call context, params, services, action dispatch
//! - [`broker`]: one node; calls, inbound routing, failure handling
//! - [`transport`]: transporter contract, in-memory bus, framed link
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging, metrics
//!
//! ## Example
//! ```ignore
//! use std::sync::Arc;
//! use stream_bridge::prelude::*;
//!
//! let bus = MemoryBus::new();
//! let node1 = Broker::new(BridgeConfig::for_node("node-1"), Arc::new(bus.transporter("node-1".into())))?;
//! let node2 = Broker::new(BridgeConfig::for_node("node-2"), Arc::new(bus.transporter("node-2".into())))?;
//!
//! node2.create_service(Service::new("text").action("upper", |mut ctx| async move {
//!     let input = ctx.take_stream()?;
//!     Ok(Param::Streamed(input.map_chunks(|c| c.to_ascii_uppercase().into())))
//! }))?;
//! node1.start().await?;
//! node2.start().await?;
//!
//! let (writer, source) = node1.stream_channel();
//! let reply = node1.call("text.upper", Param::Streamed(source), CallOptions::new().node("node-2")).await?;
//! writer.write("first chunk").await?;
//! writer.end();
//! let upper = reply.into_stream().unwrap().read_to_end().await?;
//! ```

pub mod broker;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod stream;
pub mod transport;
pub mod utils;

pub use broker::{Broker, CallOptions};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result, StreamError};

/// Everything a typical node needs.
pub mod prelude {
    pub use crate::broker::{Broker, CallOptions};
    pub use crate::config::BridgeConfig;
    pub use crate::core::ids::{CallId, NodeId};
    pub use crate::error::{BridgeError, Result, StreamError};
    pub use crate::protocol::{Context, Param, Service};
    pub use crate::stream::{channel, ByteStream, StreamEvent, StreamListener, StreamWriter};
    pub use crate::transport::{FramedTransporter, MemoryBus, MemoryTransporter, Transporter};
}
