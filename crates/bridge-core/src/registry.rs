//! Operation name to handler mapping.
//!
//! Handlers are registered at startup. Once the registry is handed to a
//! server it lives behind an `Arc` and can no longer be mutated.

use crate::error::{BridgeError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Error returned by an operation handler.
///
/// Its message is sent to the caller verbatim inside
/// `Handler error in '<operation>': <message>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Result type for operation handlers.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// A registered operation handler.
pub type Handler = Arc<dyn Fn(Value) -> HandlerResult + Send + Sync>;

/// Maps operation names to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `operation`. A previous handler with the same
    /// name is replaced.
    pub fn register<F>(&mut self, operation: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        let operation = operation.into();
        if self
            .handlers
            .insert(operation.clone(), Arc::new(handler))
            .is_some()
        {
            debug!(operation = %operation, "Replaced existing handler");
        } else {
            debug!(operation = %operation, "Registered handler");
        }
    }

    pub fn lookup(&self, operation: &str) -> Option<&Handler> {
        self.handlers.get(operation)
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `operation`.
    ///
    /// Panics inside the handler propagate to the caller.
    pub fn dispatch(&self, operation: &str, data: Value) -> Result<Value> {
        let handler = self
            .lookup(operation)
            .ok_or_else(|| BridgeError::UnknownOperation(operation.to_string()))?;

        handler(data).map_err(|e| BridgeError::Handler {
            operation: operation.to_string(),
            message: e.message,
        })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}
