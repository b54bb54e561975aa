// Services Module
//
// INTENTION:
// Everything between a service definition and the wire: the local service
// registry, the handler contexts, the action dispatcher that routes calls to
// one healthy node, and the event bus that fans events out.
//
// ARCHITECTURAL PRINCIPLES:
// 1. Handlers never see the node directly; they get a `NodeDelegate` handle
//    through their context
// 2. No global broker: every context carries the handle of the node that
//    created it
// 3. Handler failures are values, never crashes of the host

pub mod dispatcher;
pub mod event_bus;
pub mod event_context;
pub mod load_balancing;
pub mod request_context;
pub mod service;
pub mod service_registry;

pub use dispatcher::ActionDispatcher;
pub use event_bus::EventBus;
pub use event_context::EventContext;
pub use load_balancing::{LoadBalancingStrategy, RandomLoadBalancer, RoundRobinLoadBalancer};
pub use request_context::RequestContext;
pub use service::{
    ActionDefinition, ActionHandler, EventDefinition, EventHandler, LifecycleHook,
    ServiceDefinition,
};
pub use service_registry::{LocalAction, LocalEventHandler, ServiceRegistry};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;
use crate::util::logging::Logger;

/// Handle through which handlers reach the node hosting them
///
/// INTENTION: Give handlers a narrow interface to call actions and publish
/// events without holding on to the Node itself. The Node implements this
/// trait and injects itself into every context it creates.
#[async_trait]
pub trait NodeDelegate: Send + Sync {
    /// Id of the hosting node
    fn node_id(&self) -> &str;

    /// Call an action anywhere in the mesh
    async fn call_with_options(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, BrokerError>;

    /// Deliver an event to every node with a matching subscription
    async fn broadcast_with_meta(
        &self,
        event: &str,
        payload: Value,
        meta: Map<String, Value>,
    ) -> Result<(), BrokerError>;

    /// Deliver an event to exactly one node with a matching subscription
    async fn emit_with_meta(
        &self,
        event: &str,
        payload: Value,
        meta: Map<String, Value>,
    ) -> Result<(), BrokerError>;
}

/// Where a call sits in a chain of nested calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLineage {
    /// Id shared by every call of one chain
    pub request_id: String,
    /// Correlation id of the call that issued this one
    pub parent_id: String,
    /// Nesting depth of this call, 1 for a top-level call
    pub level: u32,
}

/// Per-call options
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Overrides the per-action and node defaults
    pub timeout: Option<Duration>,
    /// Overrides the node's retry policy
    pub retries: Option<u32>,
    pub meta: Map<String, Value>,
    /// Cancelling the token fails the call with `Cancelled`
    pub cancellation: Option<CancellationToken>,
    pub(crate) lineage: Option<CallLineage>,
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("meta", &self.meta)
            .field("cancellable", &self.cancellation.is_some())
            .field("lineage", &self.lineage)
            .finish()
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Context handed to lifecycle hooks
#[derive(Clone)]
pub struct LifecycleContext {
    pub service_name: String,
    pub logger: Logger,
    node_delegate: Arc<dyn NodeDelegate>,
}

impl fmt::Debug for LifecycleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleContext")
            .field("service_name", &self.service_name)
            .field("node_id", &self.node_delegate.node_id())
            .finish()
    }
}

impl LifecycleContext {
    pub fn new(service_name: impl Into<String>, node_delegate: Arc<dyn NodeDelegate>, logger: Logger) -> Self {
        let service_name = service_name.into();
        Self {
            logger: logger.with_path(service_name.clone()),
            service_name,
            node_delegate,
        }
    }

    pub fn node_id(&self) -> &str {
        self.node_delegate.node_id()
    }

    pub async fn call(&self, action: &str, params: Value) -> Result<Value, BrokerError> {
        self.node_delegate
            .call_with_options(action, params, CallOptions::default())
            .await
    }

    pub async fn broadcast(&self, event: &str, payload: Value) -> Result<(), BrokerError> {
        self.node_delegate
            .broadcast_with_meta(event, payload, Map::new())
            .await
    }

    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), BrokerError> {
        self.node_delegate
            .emit_with_meta(event, payload, Map::new())
            .await
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.logger.debug(message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.logger.info(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.logger.warn(message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.logger.error(message);
    }
}
