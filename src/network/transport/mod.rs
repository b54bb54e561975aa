// Network Transport Module
//
// This module defines the transport interface the node talks to and the
// reconnect helper shared by every implementation.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ReconnectPolicy;
use crate::error::BrokerError;
use crate::util::logging::Logger;

pub mod memory_transport;

pub use memory_transport::{MemoryBus, MemoryTransport};

/// Handler invoked for every message delivered on a subscribed topic
///
/// Receives the concrete topic and the raw payload. Handlers run on the
/// publisher's delivery path, so they must hand work off quickly.
pub type MessageHandler = Arc<dyn Fn(String, Vec<u8>) + Send + Sync>;

/// Suffix that turns a subscription into a prefix subscription
pub const PREFIX_WILDCARD: &str = ">";

/// Check a subscription subject against a concrete topic
///
/// `a.b` matches only `a.b`; `a.>` matches `a.b`, `a.b.c`, but not `a`.
pub fn subject_matches(subject: &str, topic: &str) -> bool {
    match subject.strip_suffix(PREFIX_WILDCARD) {
        Some(prefix) if prefix.is_empty() || prefix.ends_with('.') => {
            topic.len() > prefix.len() && topic.starts_with(prefix)
        }
        _ => subject == topic,
    }
}

/// Interface for message bus adapters
///
/// INTENTION: Decouple the node from any particular bus technology. The node
/// only needs topic-based publish/subscribe with raw byte payloads; adapters
/// for real buses implement this trait and the in-memory adapter serves tests
/// and single-process meshes.
///
/// Implementations must be safe for concurrent use. Delivery is best-effort
/// and at-most-once: a subscriber that is not connected when a message is
/// published never sees it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the connection to the bus
    ///
    /// Fails with `BrokerError::Connection` when the bus is unreachable.
    async fn connect(&self) -> Result<()>;

    /// Publish a payload on a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe a handler to an exact topic or a `prefix.>` subject
    async fn subscribe(&self, subject: &str, handler: MessageHandler) -> Result<()>;

    /// Drop all subscriptions and close the connection
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Connect a transport, retrying with exponential backoff
///
/// Gives up after `policy.max_attempts` attempts with the last error as a
/// `BrokerError::Connection`.
pub async fn connect_with_backoff(
    transport: &dyn Transport,
    policy: &ReconnectPolicy,
    logger: &Logger,
) -> Result<()> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match transport.connect().await {
            Ok(()) => {
                if attempt > 1 {
                    logger.info(format!("Transport connected after {} attempts", attempt));
                }
                return Ok(());
            }
            Err(e) if attempt >= max_attempts => {
                logger.error(format!(
                    "Giving up on transport connection after {} attempts: {}",
                    attempt, e
                ));
                return Err(BrokerError::Connection(e.to_string()).into());
            }
            Err(e) => {
                let backoff = policy.backoff(attempt);
                logger.warn(format!(
                    "Transport connection attempt {} failed: {}. Retrying in {:?}",
                    attempt, e, backoff
                ));
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("broker.discovery", "broker.discovery"));
        assert!(!subject_matches("broker.discovery", "broker.discovery.x"));
        assert!(subject_matches("broker.event.>", "broker.event.test.run"));
        assert!(subject_matches("broker.event.>", "broker.event.x"));
        assert!(!subject_matches("broker.event.>", "broker.event."));
        assert!(!subject_matches("broker.event.>", "broker.eventx.y"));
        assert!(!subject_matches("broker.event.>", "other.event.x"));
    }
}
