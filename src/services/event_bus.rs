// Event Bus
//
// INTENTION: Deliver fire-and-forget events to the right set of nodes.
//
// - broadcast: published once on the event topic; every node receives it
//   and runs the local handlers whose pattern matches the event name.
// - emit: the sender resolves the alive nodes with a matching pattern, picks
//   exactly one through its emit balancer and names it as the target; every
//   other node ignores the message.
//
// Local delivery goes through the transport like remote delivery, so a node
// never sees the same event twice. Delivery is at-most-once and best-effort:
// a node that is down or disconnected when an event is published misses it,
// and nothing is persisted or replayed.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::dispatcher::panic_message;
use super::load_balancing::{default_strategy, LoadBalancingStrategy};
use super::service_registry::LocalEventHandler;
use super::{EventContext, NodeDelegate, ServiceRegistry};
use crate::error::BrokerError;
use crate::network::{Envelope, EventPacket, Packet, Transport};
use crate::registry::NodeRegistry;
use crate::routing::{validate_event_name, Topics};
use crate::util::logging::Logger;

pub struct EventBus {
    node_id: String,
    topics: Topics,
    registry: NodeRegistry,
    services: Arc<ServiceRegistry>,
    transport: Arc<dyn Transport>,
    emit_balancer: RwLock<Arc<dyn LoadBalancingStrategy>>,
    logger: Logger,
}

impl EventBus {
    pub fn new(
        node_id: impl Into<String>,
        topics: Topics,
        registry: NodeRegistry,
        services: Arc<ServiceRegistry>,
        transport: Arc<dyn Transport>,
        logger: Logger,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            topics,
            registry,
            services,
            transport,
            emit_balancer: RwLock::new(default_strategy()),
            logger,
        }
    }

    /// Replace the strategy that picks the receiver of an emitted event
    pub async fn set_emit_balancer(&self, strategy: Arc<dyn LoadBalancingStrategy>) {
        *self.emit_balancer.write().await = strategy;
    }

    /// Deliver to every node with a matching subscription
    pub async fn broadcast(
        &self,
        event: &str,
        payload: Value,
        meta: Map<String, Value>,
    ) -> Result<(), BrokerError> {
        validate_event_name(event)?;
        self.publish(EventPacket {
            event: event.to_string(),
            payload,
            target: None,
            meta,
        })
        .await
    }

    /// Deliver to exactly one node with a matching subscription
    ///
    /// With no matching node the event is dropped.
    pub async fn emit(
        &self,
        event: &str,
        payload: Value,
        meta: Map<String, Value>,
    ) -> Result<(), BrokerError> {
        validate_event_name(event)?;

        let candidates = self
            .registry
            .resolve_event(event)
            .await
            .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
        if candidates.is_empty() {
            self.logger
                .debug(format!("No subscriber for emitted event '{}'", event));
            return Ok(());
        }

        let strategy = Arc::clone(&*self.emit_balancer.read().await);
        let index = strategy
            .select_node(&candidates, event)
            .min(candidates.len() - 1);
        let target = candidates[index].clone();
        self.logger
            .debug(format!("Emitting '{}' to node '{}'", event, target));

        self.publish(EventPacket {
            event: event.to_string(),
            payload,
            target: Some(target),
            meta,
        })
        .await
    }

    async fn publish(&self, packet: EventPacket) -> Result<(), BrokerError> {
        let topic = self.topics.event(&packet.event);
        let bytes = Envelope::new(&self.node_id, Packet::Event(packet))
            .encode()
            .map_err(|e| BrokerError::Connection(format!("Failed to encode event: {}", e)))?;
        self.transport
            .publish(&topic, bytes)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    /// Run the local handlers matching an incoming event
    ///
    /// Handlers run in their own tasks; failures are logged and go nowhere
    /// else, since events have no reply.
    pub async fn handle_event(&self, sender: &str, packet: EventPacket, delegate: Arc<dyn NodeDelegate>) {
        if let Some(target) = &packet.target {
            if target != &self.node_id {
                return;
            }
        }

        let handlers = self.services.event_handlers(&packet.event).await;
        if handlers.is_empty() {
            self.logger.trace(format!(
                "No local handler for event '{}' from '{}'",
                packet.event, sender
            ));
            return;
        }

        for handler in handlers {
            let ctx = EventContext::new(
                packet.event.clone(),
                handler.pattern.clone(),
                packet.payload.clone(),
                sender,
                Arc::clone(&delegate),
                &self.logger,
            )
            .with_meta(packet.meta.clone())
            .with_emitted(packet.target.is_some());
            self.spawn_handler(handler, ctx);
        }
    }

    fn spawn_handler(&self, handler: LocalEventHandler, ctx: EventContext) {
        let logger = ctx.logger.clone();
        let task = tokio::spawn((handler.handler)(ctx));
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => logger.error(format!(
                    "Event handler of service '{}' ({}) failed: {}",
                    handler.service, handler.pattern, e
                )),
                Err(join_error) if join_error.is_panic() => logger.error(format!(
                    "Event handler of service '{}' ({}) panicked: {}",
                    handler.service,
                    handler.pattern,
                    panic_message(join_error.into_panic())
                )),
                Err(join_error) => logger.warn(format!(
                    "Event handler of service '{}' was cancelled: {}",
                    handler.service, join_error
                )),
            }
        });
    }
}
