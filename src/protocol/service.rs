//! Service definitions.
//!
//! A service is a named group of actions. Registering service `file` with
//! action `save` makes `file.save` callable.
//!
//! ```ignore
//! let service = Service::new("text").action("upper", |mut ctx| async move {
//!     let input = ctx.take_stream()?;
//!     Ok(Param::Streamed(input.map_chunks(|c| c.to_ascii_uppercase().into())))
//! });
//! broker.create_service(service)?;
//! ```

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::context::{Context, Param};

/// Type-erased action handler.
pub type ActionHandler = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Param>> + Send + Sync>;

pub struct Service {
    name: String,
    actions: Vec<(String, ActionHandler)>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Add an action. Its full name is `<service>.<action>`.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Param>> + Send + 'static,
    {
        let handler: ActionHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.actions.push((name.into(), handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified action names.
    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|(action, _)| format!("{}.{}", self.name, action))
            .collect()
    }

    pub(crate) fn into_actions(self) -> impl Iterator<Item = (String, ActionHandler)> {
        let name = self.name;
        self.actions
            .into_iter()
            .map(move |(action, handler)| (format!("{}.{}", name, action), handler))
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("actions", &self.action_names())
            .finish()
    }
}
