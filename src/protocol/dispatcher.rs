use crate::error::{BridgeError, Result};
use crate::protocol::context::{Context, Param};
use crate::protocol::service::{ActionHandler, Service};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Action table: fully qualified action name to handler.
///
/// Cloning shares the table.
#[derive(Clone)]
pub struct ActionDispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, ActionHandler>>>,
    services: Arc<RwLock<HashSet<String>>>,
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            services: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Register every action of `service`. A service name may be used once.
    pub fn register_service(&self, service: Service) -> Result<Vec<String>> {
        let mut services = self.services.write().map_err(|_| BridgeError::LockPoisoned)?;
        if !services.insert(service.name().to_string()) {
            return Err(BridgeError::ServiceExists(service.name().to_string()));
        }

        let mut handlers = self.handlers.write().map_err(|_| BridgeError::LockPoisoned)?;
        let mut names = Vec::new();
        for (name, handler) in service.into_actions() {
            debug!(action = %name, "Action registered");
            handlers.insert(Cow::Owned(name.clone()), handler);
            names.push(name);
        }
        Ok(names)
    }

    pub fn lookup(&self, action: &str) -> Result<ActionHandler> {
        let handlers = self.handlers.read().map_err(|_| BridgeError::LockPoisoned)?;
        handlers
            .get(action)
            .cloned()
            .ok_or_else(|| BridgeError::ActionNotFound(action.to_string()))
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(action))
            .unwrap_or(false)
    }

    pub fn actions(&self) -> Vec<String> {
        self.handlers
            .read()
            .map(|handlers| handlers.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default()
    }

    /// Run the handler for `ctx.action`.
    pub async fn dispatch(&self, ctx: Context) -> Result<Param> {
        let handler = self.lookup(&ctx.action)?;
        handler(ctx).await
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("actions", &self.actions())
            .finish()
    }
}
