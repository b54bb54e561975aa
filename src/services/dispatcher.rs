// Action Dispatcher
//
// INTENTION: Route a call for an action name to exactly one healthy node and
// bring its reply back. Outbound, a call is resolved against the node
// registry, a node is picked by the load balancer, and the request is either
// run in-process (local node) or published to the node's request topic with a
// fresh correlation id. The caller then waits on a oneshot that the reply
// worker fulfils, bounded by the call's deadline and cancellation token.
// Inbound, requests addressed to this node are run against the local service
// registry and answered on the caller's reply topic.
//
// A pending call exists from dispatch until reply, timeout or cancellation,
// whichever comes first; a reply arriving after that is logged and dropped.

use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::load_balancing::{default_strategy, LoadBalancingStrategy};
use super::service::ActionHandler;
use super::{CallOptions, NodeDelegate, RequestContext, ServiceRegistry};
use crate::config::{RetryPolicy, RetrySelection};
use crate::error::{ActionError, BrokerError};
use crate::network::{Envelope, ErrorPayload, Packet, RequestPacket, ResponsePacket, Transport};
use crate::registry::{ActionDescriptor, ActionEndpoint, NodeRegistry};
use crate::routing::{validate_action_name, Topics};
use crate::util::logging::Logger;

/// Error kind replied when a request reaches a node that no longer hosts the action
pub const SERVICE_NOT_FOUND: &str = "ServiceNotFound";

type ReplySender = oneshot::Sender<Result<Value, BrokerError>>;

struct PendingCall {
    action: String,
    node_id: String,
    reply: ReplySender,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingCall>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingCall>> {
    // Entries stay consistent even if a holder panicked
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a pending call when the waiting caller goes away
struct PendingGuard {
    pending: PendingMap,
    correlation_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.correlation_id);
    }
}

/// Current time in epoch milliseconds
pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Run an action handler in its own task
///
/// Errors and panics both come back as an `ActionError`; the host keeps
/// running either way.
pub(crate) async fn run_action(handler: ActionHandler, ctx: RequestContext) -> Result<Value, ActionError> {
    match tokio::spawn(handler(ctx)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ActionError::from_anyhow(&e)),
        Err(join_error) if join_error.is_panic() => Err(ActionError::new(
            "Panic",
            panic_message(join_error.into_panic()),
        )),
        Err(join_error) => Err(ActionError::new("Cancelled", join_error.to_string())),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Routes calls to one node and correlates replies
pub struct ActionDispatcher {
    node_id: String,
    topics: Topics,
    registry: NodeRegistry,
    services: Arc<ServiceRegistry>,
    transport: Arc<dyn Transport>,
    load_balancer: RwLock<Arc<dyn LoadBalancingStrategy>>,
    pending: PendingMap,
    default_timeout: Duration,
    retry_policy: RetryPolicy,
    logger: Logger,
}

impl ActionDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        topics: Topics,
        registry: NodeRegistry,
        services: Arc<ServiceRegistry>,
        transport: Arc<dyn Transport>,
        default_timeout: Duration,
        retry_policy: RetryPolicy,
        logger: Logger,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            topics,
            registry,
            services,
            transport,
            load_balancer: RwLock::new(default_strategy()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
            retry_policy,
            logger,
        }
    }

    /// Replace the node selection strategy
    pub async fn set_load_balancer(&self, strategy: Arc<dyn LoadBalancingStrategy>) {
        *self.load_balancer.write().await = strategy;
    }

    /// Number of calls waiting for a remote reply
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Call an action somewhere in the mesh
    ///
    /// No candidate fails at once with `ServiceUnavailable`. A timeout with
    /// retries left re-resolves and re-dispatches; which node is tried next
    /// follows the retry policy's reselection mode.
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
        delegate: Arc<dyn NodeDelegate>,
    ) -> Result<Value, BrokerError> {
        validate_action_name(action)?;

        let mut retries_left = options
            .retries
            .unwrap_or_else(|| self.retry_policy.effective_retries());
        let mut failed: Vec<String> = Vec::new();

        loop {
            let descriptor = self
                .registry
                .descriptor(action)
                .await
                .map_err(|e| BrokerError::InvalidState(e.to_string()))?
                .ok_or_else(|| BrokerError::ServiceUnavailable {
                    action: action.to_string(),
                })?;

            let endpoint = self.select_endpoint(&descriptor, &failed).await;
            let timeout = options
                .timeout
                .or(endpoint.timeout)
                .unwrap_or(self.default_timeout);

            self.logger.debug(format!(
                "Calling '{}' on node '{}' (timeout {:?})",
                action, endpoint.node_id, timeout
            ));

            let result = if endpoint.node_id == self.node_id {
                self.call_local(action, params.clone(), &options, timeout, Arc::clone(&delegate))
                    .await
            } else {
                self.call_remote(action, params.clone(), &options, &endpoint.node_id, timeout)
                    .await
            };

            match result {
                Err(BrokerError::CallTimeout { .. }) if retries_left > 0 => {
                    retries_left -= 1;
                    self.logger.warn(format!(
                        "Call '{}' timed out on node '{}', retrying ({} retries left)",
                        action, endpoint.node_id, retries_left
                    ));
                    failed.push(endpoint.node_id);
                }
                other => return other,
            }
        }
    }

    async fn select_endpoint(&self, descriptor: &ActionDescriptor, failed: &[String]) -> ActionEndpoint {
        let mut candidates: Vec<&ActionEndpoint> = match self.retry_policy.reselection {
            RetrySelection::AvoidFailed => descriptor
                .endpoints
                .iter()
                .filter(|e| !failed.contains(&e.node_id))
                .collect(),
            RetrySelection::Any => descriptor.endpoints.iter().collect(),
        };
        // Every candidate already failed: fall back to all of them
        if candidates.is_empty() {
            candidates = descriptor.endpoints.iter().collect();
        }

        let ids: Vec<String> = candidates.iter().map(|e| e.node_id.clone()).collect();
        let strategy = Arc::clone(&*self.load_balancer.read().await);
        let index = strategy
            .select_node(&ids, &descriptor.name)
            .min(ids.len().saturating_sub(1));
        candidates[index].clone()
    }

    async fn call_local(
        &self,
        action: &str,
        params: Value,
        options: &CallOptions,
        timeout: Duration,
        delegate: Arc<dyn NodeDelegate>,
    ) -> Result<Value, BrokerError> {
        let local = self
            .services
            .action(action)
            .await
            .ok_or_else(|| BrokerError::ServiceUnavailable {
                action: action.to_string(),
            })?;

        let correlation_id = Uuid::new_v4().to_string();
        let lineage = options.lineage.clone();
        let ctx = RequestContext::new(action, params, correlation_id, delegate, &self.logger)
            .with_meta(options.meta.clone())
            .with_lineage(
                lineage.as_ref().map(|l| l.request_id.clone()),
                lineage.as_ref().map(|l| l.parent_id.clone()),
                lineage.as_ref().map(|l| l.level).unwrap_or(1),
            );

        tokio::select! {
            result = tokio::time::timeout(timeout, run_action(local.handler, ctx)) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(BrokerError::RemoteActionError {
                    action: action.to_string(),
                    node_id: self.node_id.clone(),
                    kind: e.kind,
                    message: e.message,
                    data: e.data,
                }),
                Err(_) => Err(self.timeout_error(action, &self.node_id, timeout)),
            },
            _ = cancelled(options.cancellation.as_ref()) => Err(BrokerError::Cancelled {
                action: action.to_string(),
            }),
        }
    }

    async fn call_remote(
        &self,
        action: &str,
        params: Value,
        options: &CallOptions,
        node_id: &str,
        timeout: Duration,
    ) -> Result<Value, BrokerError> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        lock(&self.pending).insert(
            correlation_id.clone(),
            PendingCall {
                action: action.to_string(),
                node_id: node_id.to_string(),
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            correlation_id: correlation_id.clone(),
        };

        let lineage = options.lineage.as_ref();
        let request = RequestPacket {
            correlation_id,
            action: action.to_string(),
            params,
            meta: options.meta.clone(),
            reply_topic: self.topics.response(&self.node_id),
            deadline: now_millis() + timeout.as_millis() as u64,
            level: lineage.map(|l| l.level).unwrap_or(1),
            parent_id: lineage.map(|l| l.parent_id.clone()),
            request_id: lineage.map(|l| l.request_id.clone()),
        };

        let bytes = Envelope::new(&self.node_id, Packet::Request(request))
            .encode()
            .map_err(|e| BrokerError::Connection(format!("Failed to encode request: {}", e)))?;
        self.transport
            .publish(&self.topics.request(node_id), bytes)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        tokio::select! {
            reply = tokio::time::timeout(timeout, rx) => match reply {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(BrokerError::Cancelled { action: action.to_string() }),
                Err(_) => Err(self.timeout_error(action, node_id, timeout)),
            },
            _ = cancelled(options.cancellation.as_ref()) => Err(BrokerError::Cancelled {
                action: action.to_string(),
            }),
        }
    }

    fn timeout_error(&self, action: &str, node_id: &str, timeout: Duration) -> BrokerError {
        BrokerError::CallTimeout {
            action: action.to_string(),
            node_id: node_id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Fulfil the pending call a reply belongs to
    pub fn complete(&self, sender: &str, response: ResponsePacket) {
        let Some(call) = lock(&self.pending).remove(&response.correlation_id) else {
            self.logger.warn(format!(
                "Discarding late or unknown reply '{}' from node '{}'",
                response.correlation_id, sender
            ));
            return;
        };

        if call.node_id != sender {
            self.logger.warn(format!(
                "Reply '{}' for '{}' came from '{}' instead of '{}'",
                response.correlation_id, call.action, sender, call.node_id
            ));
        }

        let result = match response.error {
            Some(error) => Err(BrokerError::RemoteActionError {
                action: call.action,
                node_id: sender.to_string(),
                kind: error.kind,
                message: error.message,
                data: error.data,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        if call.reply.send(result).is_err() {
            self.logger
                .debug(format!("Caller of '{}' went away before the reply", response.correlation_id));
        }
    }

    /// Fail every pending call with `Cancelled`
    pub fn cancel_all(&self) {
        let drained: Vec<PendingCall> = lock(&self.pending).drain().map(|(_, call)| call).collect();
        if !drained.is_empty() {
            self.logger
                .info(format!("Cancelling {} pending calls", drained.len()));
        }
        for call in drained {
            let _ = call.reply.send(Err(BrokerError::Cancelled { action: call.action }));
        }
    }

    /// Run a request addressed to this node and publish the reply
    pub async fn handle_request(
        &self,
        sender: &str,
        request: RequestPacket,
        delegate: Arc<dyn NodeDelegate>,
    ) {
        if request.deadline > 0 && now_millis() > request.deadline {
            self.logger.warn(format!(
                "Dropping expired request '{}' for '{}' from '{}'",
                request.correlation_id, request.action, sender
            ));
            return;
        }

        let correlation_id = request.correlation_id.clone();
        let response = match self.services.action(&request.action).await {
            None => ResponsePacket::failure(
                correlation_id,
                ErrorPayload {
                    kind: SERVICE_NOT_FOUND.to_string(),
                    message: format!(
                        "Action '{}' is not hosted on node '{}'",
                        request.action, self.node_id
                    ),
                    data: None,
                },
            ),
            Some(local) => {
                let ctx = RequestContext::new(
                    request.action.clone(),
                    request.params,
                    request.correlation_id.clone(),
                    delegate,
                    &self.logger,
                )
                .with_meta(request.meta)
                .with_caller(sender)
                .with_lineage(request.request_id, request.parent_id, request.level);

                match run_action(local.handler, ctx).await {
                    Ok(value) => ResponsePacket::success(correlation_id, value),
                    Err(e) => {
                        self.logger.debug(format!(
                            "Action '{}' failed ({}): {}",
                            request.action, e.kind, e.message
                        ));
                        ResponsePacket::failure(
                            correlation_id,
                            ErrorPayload {
                                kind: e.kind,
                                message: e.message,
                                data: e.data,
                            },
                        )
                    }
                }
            }
        };

        let bytes = match Envelope::new(&self.node_id, Packet::Response(response)).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.logger
                    .error(format!("Failed to encode reply to '{}': {}", sender, e));
                return;
            }
        };
        if let Err(e) = self.transport.publish(&request.reply_topic, bytes).await {
            self.logger
                .error(format!("Failed to publish reply to '{}': {}", sender, e));
        }
    }
}
