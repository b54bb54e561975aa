// Memory Transport
//
// INTENTION: Provide an in-process message bus for development and testing.
// Several nodes share one `MemoryBus` and each gets its own
// `MemoryTransport`; publishing on the bus delivers synchronously to every
// matching subscription of every connected transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{subject_matches, MessageHandler, Transport};
use crate::error::BrokerError;

struct Subscription {
    owner: String,
    subject: String,
    handler: MessageHandler,
}

struct BusInner {
    subscriptions: RwLock<Vec<Subscription>>,
    available: AtomicBool,
}

/// Shared in-memory bus
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(Vec::new()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Create a transport attached to this bus
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::new(self.clone())
    }

    /// Make the bus refuse new connections, simulating an outage
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions across all transports
    pub async fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().await.len()
    }

    async fn add(&self, subscription: Subscription) {
        self.inner.subscriptions.write().await.push(subscription);
    }

    async fn remove_owner(&self, owner: &str) {
        self.inner
            .subscriptions
            .write()
            .await
            .retain(|s| s.owner != owner);
    }

    async fn deliver(&self, topic: &str, payload: Vec<u8>) {
        // Handlers are called without holding the lock
        let handlers: Vec<MessageHandler> = {
            let subscriptions = self.inner.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| subject_matches(&s.subject, topic))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        for handler in handlers {
            handler(topic.to_string(), payload.clone());
        }
    }
}

/// One node's connection to a `MemoryBus`
pub struct MemoryTransport {
    id: String,
    bus: MemoryBus,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn new(bus: MemoryBus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bus,
            connected: AtomicBool::new(false),
        }
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::Connection("memory transport is not connected".to_string()).into())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<()> {
        if !self.bus.is_available() {
            return Err(BrokerError::Connection("memory bus is unavailable".to_string()).into());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_connected()?;
        self.bus.deliver(topic, payload).await;
        Ok(())
    }

    async fn subscribe(&self, subject: &str, handler: MessageHandler) -> Result<()> {
        self.ensure_connected()?;
        if subject.is_empty() {
            return Err(anyhow!("Subscription subject must not be empty"));
        }
        self.bus
            .add(Subscription {
                owner: self.id.clone(),
                subject: subject.to_string(),
                handler,
            })
            .await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.bus.remove_owner(&self.id).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
