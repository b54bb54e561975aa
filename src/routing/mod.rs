// Routing Module
//
// INTENTION:
// Define how actions and events are named and how those names map onto
// transport topics. Action names are fully qualified `service.action`
// strings, event names are dot-delimited, and event subscriptions may use
// `*` (one segment) and a trailing `**` (zero or more segments).
//
// ARCHITECTURAL PRINCIPLES:
// 1. Names are validated once, at registration or call time
// 2. Pattern matching is precomputed into a PathTrie
// 3. Every topic is prefixed by the mesh namespace so independent meshes can
//    share one bus

pub mod path_trie;

pub use path_trie::{PathTrie, MULTI_WILDCARD, SINGLE_WILDCARD};

use crate::error::BrokerError;

/// Validate a fully-qualified action name (`service.action`)
///
/// At least two non-empty segments, no wildcards.
pub fn validate_action_name(name: &str) -> Result<(), BrokerError> {
    let parts = path_trie::segments(name);
    if parts.len() < 2 || parts.iter().any(|s| s.is_empty() || is_wildcard(s)) {
        return Err(BrokerError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Validate a concrete event name (what gets broadcast or emitted)
pub fn validate_event_name(name: &str) -> Result<(), BrokerError> {
    let parts = path_trie::segments(name);
    if parts.iter().any(|s| s.is_empty() || is_wildcard(s)) {
        return Err(BrokerError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Validate an event subscription pattern
///
/// `**` is only accepted as the last segment.
pub fn validate_event_pattern(pattern: &str) -> Result<(), BrokerError> {
    let parts = path_trie::segments(pattern);
    let last = parts.len() - 1;
    for (i, segment) in parts.iter().enumerate() {
        if segment.is_empty() || (*segment == MULTI_WILDCARD && i != last) {
            return Err(BrokerError::InvalidName(pattern.to_string()));
        }
        // Partial wildcards such as `user*` are not supported
        if *segment != MULTI_WILDCARD && *segment != SINGLE_WILDCARD && segment.contains('*') {
            return Err(BrokerError::InvalidName(pattern.to_string()));
        }
    }
    Ok(())
}

fn is_wildcard(segment: &str) -> bool {
    segment.contains('*')
}

/// Service part of a fully-qualified action name
pub fn service_of(action: &str) -> &str {
    action.split('.').next().unwrap_or(action)
}

/// Transport topic names for one namespace
///
/// INTENTION: Keep the topic layout in a single place. Every node of a mesh
/// must agree on it, so nothing else formats topic strings by hand.
#[derive(Debug, Clone)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Announcements, discover requests and disconnects
    pub fn discovery(&self) -> String {
        format!("{}.discovery", self.namespace)
    }

    /// Requests addressed to one node
    pub fn request(&self, node_id: &str) -> String {
        format!("{}.req.{}", self.namespace, node_id)
    }

    /// Replies addressed to one node
    pub fn response(&self, node_id: &str) -> String {
        format!("{}.res.{}", self.namespace, node_id)
    }

    /// Topic an event is published on
    pub fn event(&self, event_name: &str) -> String {
        format!("{}.event.{}", self.namespace, event_name)
    }

    /// Subscription covering every event topic of the namespace
    pub fn all_events(&self) -> String {
        format!("{}.event.>", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert!(validate_action_name("math.add").is_ok());
        assert!(validate_action_name("v2.math.add").is_ok());
        assert!(validate_action_name("add").is_err());
        assert!(validate_action_name("math.").is_err());
        assert!(validate_action_name("math.*").is_err());
    }

    #[test]
    fn test_event_patterns() {
        assert!(validate_event_pattern("test.**").is_ok());
        assert!(validate_event_pattern("**").is_ok());
        assert!(validate_event_pattern("order.*.shipped").is_ok());
        assert!(validate_event_pattern("test.**.run").is_err());
        assert!(validate_event_pattern("user*.created").is_err());
        assert!(validate_event_pattern("a..b").is_err());

        assert!(validate_event_name("test.run").is_ok());
        assert!(validate_event_name("test.*").is_err());
    }

    #[test]
    fn test_topics_are_namespaced() {
        let topics = Topics::new("broker");
        assert_eq!(topics.discovery(), "broker.discovery");
        assert_eq!(topics.request("node-a"), "broker.req.node-a");
        assert_eq!(topics.response("node-a"), "broker.res.node-a");
        assert_eq!(topics.event("test.run"), "broker.event.test.run");
        assert_eq!(topics.all_events(), "broker.event.>");
        assert_eq!(service_of("math.add"), "math");
    }
}
