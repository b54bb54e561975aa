// Service Definition
//
// INTENTION: Describe a service as plain data: a name, a version, an explicit
// map of action names to handlers, event patterns to handlers, and optional
// lifecycle hooks. Handlers are ordinary async closures; everything they
// need (params, metadata, a handle back to the node) arrives in their
// context argument.

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{EventContext, LifecycleContext, RequestContext};

/// Handler for one action
pub type ActionHandler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handler for events matching one pattern
pub type EventHandler = Arc<dyn Fn(EventContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Lifecycle hook (`created`, `started`, `stopped`)
pub type LifecycleHook = Arc<dyn Fn(LifecycleContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One action of a service
#[derive(Clone)]
pub struct ActionDefinition {
    /// Short name, without the service prefix
    pub name: String,
    pub handler: ActionHandler,
    /// Overrides the node's default request timeout for this action
    pub timeout: Option<Duration>,
}

/// One event subscription of a service
#[derive(Clone)]
pub struct EventDefinition {
    pub pattern: String,
    pub handler: EventHandler,
}

/// A named bundle of action and event handlers
#[derive(Clone)]
pub struct ServiceDefinition {
    pub name: String,
    pub version: String,
    pub actions: Vec<ActionDefinition>,
    pub events: Vec<EventDefinition>,
    pub created: Option<LifecycleHook>,
    pub started: Option<LifecycleHook>,
    pub stopped: Option<LifecycleHook>,
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field(
                "actions",
                &self.actions.iter().map(|a| &a.name).collect::<Vec<_>>(),
            )
            .field(
                "events",
                &self.events.iter().map(|e| &e.pattern).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            actions: Vec::new(),
            events: Vec::new(),
            created: None,
            started: None,
            stopped: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add an action; it is exposed as `<service>.<name>`
    pub fn action<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.add_action(name.into(), None, handler)
    }

    /// Add an action with its own timeout
    pub fn action_with_timeout<F, Fut>(
        self,
        name: impl Into<String>,
        timeout: Duration,
        handler: F,
    ) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.add_action(name.into(), Some(timeout), handler)
    }

    fn add_action<F, Fut>(mut self, name: String, timeout: Option<Duration>, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: ActionHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.actions.push(ActionDefinition {
            name,
            handler,
            timeout,
        });
        self
    }

    /// Subscribe to events matching `pattern` (`*` and trailing `**` allowed)
    pub fn event<F, Fut>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.events.push(EventDefinition {
            pattern: pattern.into(),
            handler,
        });
        self
    }

    pub fn on_created<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.created = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn on_started<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.started = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn on_stopped<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stopped = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Fully-qualified action names, in declaration order
    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|a| format!("{}.{}", self.name, a.name))
            .collect()
    }
}
