// RequestContext Module
//
// INTENTION:
// This module provides the implementation of RequestContext, which carries
// everything an action handler needs: the params, the caller's metadata, the
// position of the call in a chain of nested calls, a logger, and the handle
// to the hosting node.
//
// ARCHITECTURAL PRINCIPLE:
// Each request gets its own context that moves with the request through the
// handler. Nested calls made through the context inherit the request id and
// metadata so a chain of calls can be traced end to end.

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::{CallLineage, CallOptions, NodeDelegate};
use crate::error::BrokerError;
use crate::util::logging::Logger;

/// Context for handling one action call
#[derive(Clone)]
pub struct RequestContext {
    /// Fully-qualified action name
    pub action: String,
    pub params: Value,
    pub meta: Map<String, Value>,
    /// Node that issued the call
    pub caller: String,
    /// Correlation id of this call
    pub id: String,
    /// Id shared by every call of the chain this call belongs to
    pub request_id: String,
    pub parent_id: Option<String>,
    /// Nesting depth, 1 for a top-level call
    pub level: u32,
    /// Logger for this context - pre-configured with the action path
    pub logger: Logger,

    node_delegate: Arc<dyn NodeDelegate>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("action", &self.action)
            .field("params", &self.params)
            .field("meta", &self.meta)
            .field("caller", &self.caller)
            .field("id", &self.id)
            .field("request_id", &self.request_id)
            .field("parent_id", &self.parent_id)
            .field("level", &self.level)
            .finish()
    }
}

impl RequestContext {
    /// Create a context for a top-level call
    ///
    /// The lineage fields default to a fresh chain rooted at this call; use
    /// `with_lineage` for calls that arrived with one.
    pub fn new(
        action: impl Into<String>,
        params: Value,
        id: impl Into<String>,
        node_delegate: Arc<dyn NodeDelegate>,
        logger: &Logger,
    ) -> Self {
        let action = action.into();
        let id = id.into();
        Self {
            logger: logger.with_path(action.clone()),
            caller: node_delegate.node_id().to_string(),
            action,
            params,
            meta: Map::new(),
            request_id: id.clone(),
            id,
            parent_id: None,
            level: 1,
            node_delegate,
        }
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = caller.into();
        self
    }

    pub fn with_lineage(mut self, request_id: Option<String>, parent_id: Option<String>, level: u32) -> Self {
        if let Some(request_id) = request_id {
            self.request_id = request_id;
        }
        self.parent_id = parent_id;
        self.level = level.max(1);
        self
    }

    /// Id of the node running this handler
    pub fn node_id(&self) -> &str {
        self.node_delegate.node_id()
    }

    /// Deserialize one named parameter
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| anyhow!("Missing parameter '{}'", name))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow!("Invalid parameter '{}': {}", name, e))
    }

    /// Deserialize all params at once
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.params.clone())?)
    }

    /// Call another action as a child of this call
    pub async fn call(&self, action: &str, params: Value) -> Result<Value, BrokerError> {
        self.call_with_options(action, params, CallOptions::default())
            .await
    }

    /// Call another action as a child of this call, with explicit options
    ///
    /// The child inherits this call's metadata; keys set in `options.meta`
    /// take precedence.
    pub async fn call_with_options(
        &self,
        action: &str,
        params: Value,
        mut options: CallOptions,
    ) -> Result<Value, BrokerError> {
        let mut meta = self.meta.clone();
        meta.extend(options.meta);
        options.meta = meta;
        options.lineage = Some(CallLineage {
            request_id: self.request_id.clone(),
            parent_id: self.id.clone(),
            level: self.level + 1,
        });
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
