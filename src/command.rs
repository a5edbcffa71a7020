//! Command registry for the management endpoint.
//!
//! Each command is a named handler mounted under `/{name}` on the
//! management server. Handlers registered before the server starts are
//! routable; registrations after startup have no effect.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::engine::Engine;
use crate::response::CommandResponse;

/// A management command executed against the running engine.
pub trait CommandHandler: Send + Sync {
    /// Path segment the command is mounted at.
    fn name(&self) -> &'static str;

    /// One-line summary shown in the command index.
    fn description(&self) -> &'static str;

    fn handle(&self, engine: &Engine, request: &CommandRequest) -> CommandResponse;
}

/// Inputs for a single command invocation: query parameters and, for
/// POST requests, the parsed JSON body.
#[derive(Debug, Default)]
pub struct CommandRequest {
    pub params: HashMap<String, String>,
    pub body: Option<Value>,
}

impl CommandRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|value| value.as_str())
    }
}

/// Named handlers keyed by command name. Iteration order is the sorted
/// command name, so the mounted routes are stable across runs.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in commands.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for handler in crate::handlers::builtin_handlers() {
            registry.register(handler);
        }
        registry
    }

    /// Adds a handler, replacing any existing one with the same name.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        let name = handler.name();
        if self.handlers.insert(name, handler).is_some() {
            debug!(target: "turnstile::command", command = name, "replaced command handler");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(name)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn CommandHandler>> {
        self.handlers.values()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
