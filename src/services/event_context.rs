// EventContext Module
//
// INTENTION:
// This module provides the implementation of EventContext, which carries the
// event name, payload and metadata into an event handler, together with a
// logger and the handle to the hosting node.
//
// ARCHITECTURAL PRINCIPLE:
// Events are fire-and-forget: a handler has nothing to reply to, but it may
// call actions and publish further events through the context.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::{CallOptions, NodeDelegate};
use crate::error::BrokerError;
use crate::util::logging::Logger;

/// Context for handling one delivered event
#[derive(Clone)]
pub struct EventContext {
    /// Concrete event name (never a pattern)
    pub event: String,
    /// Subscription pattern that matched
    pub pattern: String,
    pub payload: Value,
    pub meta: Map<String, Value>,
    /// Node that published the event
    pub sender: String,
    /// Whether the event was emitted to this node alone
    pub emitted: bool,
    /// Logger instance specific to this context
    pub logger: Logger,

    node_delegate: Arc<dyn NodeDelegate>,
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .field("pattern", &self.pattern)
            .field("payload", &self.payload)
            .field("sender", &self.sender)
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl EventContext {
    pub fn new(
        event: impl Into<String>,
        pattern: impl Into<String>,
        payload: Value,
        sender: impl Into<String>,
        node_delegate: Arc<dyn NodeDelegate>,
        logger: &Logger,
    ) -> Self {
        let event = event.into();
        Self {
            logger: logger.with_path(event.clone()),
            event,
            pattern: pattern.into(),
            payload,
            meta: Map::new(),
            sender: sender.into(),
            emitted: false,
            node_delegate,
        }
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_emitted(mut self, emitted: bool) -> Self {
        self.emitted = emitted;
        self
    }

    /// Id of the node running this handler
    pub fn node_id(&self) -> &str {
        self.node_delegate.node_id()
    }

    pub async fn call(&self, action: &str, params: Value) -> Result<Value, BrokerError> {
        let options = CallOptions {
            meta: self.meta.clone(),
            ..CallOptions::default()
        };
        self.node_delegate
            .call_with_options(action, params, options)
            .await
    }

    pub async fn broadcast(&self, event: &str, payload: Value) -> Result<(), BrokerError> {
        self.node_delegate
            .broadcast_with_meta(event, payload, self.meta.clone())
            .await
    }

    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), BrokerError> {
        self.node_delegate
            .emit_with_meta(event, payload, self.meta.clone())
            .await
    }

    /// Helper method to log debug level message
    pub fn debug(&self, message: impl Into<String>) {
        self.logger.debug(message);
    }

    /// Helper method to log info level message
    pub fn info(&self, message: impl Into<String>) {
        self.logger.info(message);
    }

    /// Helper method to log warning level message
    pub fn warn(&self, message: impl Into<String>) {
        self.logger.warn(message);
    }

    /// Helper method to log error level message
    pub fn error(&self, message: impl Into<String>) {
        self.logger.error(message);
    }
}
