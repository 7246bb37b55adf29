//! # Call Protocol
//!
//! What handler authors see: the call [`Context`], the [`Param`] union,
//! [`Service`] definitions, and the [`ActionDispatcher`] that routes an
//! action name to its handler.

pub mod context;
pub mod dispatcher;
pub mod service;

pub use context::{Context, Param};
pub use dispatcher::ActionDispatcher;
pub use service::{ActionHandler, Service};
