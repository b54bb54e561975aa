// Component Logging
//
// INTENTION: Give every part of the node a small, cloneable logger that
// prefixes lines with the node id and component, and routes them to a
// per-component `log` target so LoggingConfig can filter by component.

use log::{debug, error, info, trace, warn, Level};

/// Logical component emitting a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Node,
    Registry,
    Dispatcher,
    EventBus,
    Service,
    Transport,
    Custom(&'static str),
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Node => "Node",
            Component::Registry => "Registry",
            Component::Dispatcher => "Dispatcher",
            Component::EventBus => "EventBus",
            Component::Service => "Service",
            Component::Transport => "Transport",
            Component::Custom(name) => name,
        }
    }

    /// `log` target used for lines from this component
    pub fn target(&self) -> &'static str {
        match self {
            Component::Node => "mesh_node::node",
            Component::Registry => "mesh_node::registry",
            Component::Dispatcher => "mesh_node::dispatcher",
            Component::EventBus => "mesh_node::event_bus",
            Component::Service => "mesh_node::services",
            Component::Transport => "mesh_node::transport",
            Component::Custom(_) => "mesh_node",
        }
    }
}

/// Logger bound to a node id and component
#[derive(Debug, Clone)]
pub struct Logger {
    node_id: String,
    component: Component,
    /// Action or event being handled, if any
    path: Option<String>,
}

impl Logger {
    /// Create a root logger for a node
    pub fn new_root(component: Component, node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            component,
            path: None,
        }
    }

    /// Same node, different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            node_id: self.node_id.clone(),
            component,
            path: self.path.clone(),
        }
    }

    /// Attach the action or event path being processed
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            node_id: self.node_id.clone(),
            component: self.component,
            path: Some(path.into()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn component(&self) -> Component {
        self.component
    }

    fn prefix(&self) -> String {
        match &self.path {
            Some(path) => format!(
                "[{}][{}][{}]",
                self.node_id,
                self.component.as_str(),
                path
            ),
            None => format!("[{}][{}]", self.node_id, self.component.as_str()),
        }
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        let target = self.component.target();
        let prefix = self.prefix();
        let message = message.into();
        match level {
            Level::Error => error!(target: target, "{} {}", prefix, message),
            Level::Warn => warn!(target: target, "{} {}", prefix, message),
            Level::Info => info!(target: target, "{} {}", prefix, message),
            Level::Debug => debug!(target: target, "{} {}", prefix, message),
            Level::Trace => trace!(target: target, "{} {}", prefix, message),
        }
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(Level::Trace, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_contains_node_component_and_path() {
        let logger = Logger::new_root(Component::Node, "node-1");
        assert_eq!(logger.prefix(), "[node-1][Node]");

        let scoped = logger
            .with_component(Component::Service)
            .with_path("math.add");
        assert_eq!(scoped.prefix(), "[node-1][Service][math.add]");
        assert_eq!(scoped.component().target(), "mesh_node::services");
    }
}
