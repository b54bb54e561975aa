// Node Implementation
//
// INTENTION: Host local services and wire them into the mesh. The Node owns
// the transport connection, the registry actor, the dispatcher and the event
// bus; it turns inbound transport messages into work for them and exposes
// the call / broadcast / emit surface to its users and to handlers.
//
// Inbound messages are split by topic into one channel per message type
// (discovery, requests, replies, events), each drained by its own worker
// task. Discovery is processed strictly in arrival order; every request runs
// in its own task so slow handlers and nested calls never block the host.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{LoggingConfig, ReconnectPolicy, RetryPolicy};
use crate::error::BrokerError;
use crate::network::{
    connect_with_backoff, ActionInfo, AnnouncePacket, Envelope, MessageHandler, Packet, Transport,
};
use crate::registry::{
    Announcement, Liveness, NodeChangeCallback, NodeInfo, NodeRegistry, NodeTable,
};
use crate::routing::Topics;
use crate::services::dispatcher::now_millis;
use crate::services::{
    ActionDispatcher, CallOptions, EventBus, LifecycleContext, LifecycleHook,
    LoadBalancingStrategy, NodeDelegate, ServiceDefinition, ServiceRegistry,
};
use crate::util::logging::{Component, Logger};

/// Configuration for a Node
///
/// Deserializes from JSON with camelCase keys; every field has a default.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// Unique id of this node in the mesh
    pub node_id: String,
    /// Prefix of every transport topic
    pub namespace: String,
    /// Default deadline of a call
    pub request_timeout_ms: u64,
    pub retry_policy: RetryPolicy,
    /// Period of the announcement that doubles as heartbeat
    pub heartbeat_interval_ms: u64,
    /// Silence after which a node is dead; it is suspect after half of it
    pub dead_node_grace_ms: u64,
    pub reconnect: ReconnectPolicy,
    /// Logging configuration, applied when the node is created
    #[serde(skip)]
    pub logging_config: Option<LoggingConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", Uuid::new_v4()),
            namespace: "broker".to_string(),
            request_timeout_ms: 10_000,
            retry_policy: RetryPolicy::default(),
            heartbeat_interval_ms: 5_000,
            dead_node_grace_ms: 15_000,
            reconnect: ReconnectPolicy::default(),
            logging_config: None,
        }
    }
}

impl NodeConfig {
    /// Create a new NodeConfig with a specific node id and defaults elsewhere
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from JSON, filling in defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_dead_node_grace(mut self, grace: Duration) -> Self {
        self.dead_node_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_logging_config(mut self, logging_config: LoggingConfig) -> Self {
        self.logging_config = Some(logging_config);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn dead_node_grace(&self) -> Duration {
        Duration::from_millis(self.dead_node_grace_ms)
    }

    fn validate(&self) -> Result<()> {
        for name in [&self.node_id, &self.namespace] {
            if !is_valid_topic_token(name) {
                return Err(BrokerError::InvalidName(name.clone()).into());
            }
        }
        if self.heartbeat_interval_ms == 0 || self.dead_node_grace_ms == 0 {
            return Err(anyhow!(
                "Heartbeat interval and dead node grace must be greater than zero"
            ));
        }
        Ok(())
    }
}

/// Node ids and namespaces end up inside transport subjects
fn is_valid_topic_token(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| matches!(c, '*' | '>') || c.is_whitespace())
}

/// Lifecycle state of a Node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Created => "created",
            HostState::Starting => "starting",
            HostState::Started => "started",
            HostState::Stopping => "stopping",
            HostState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Kind of inbound message a worker drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    Discovery,
    Request,
    Response,
    Event,
}

struct NodeInner {
    config: NodeConfig,
    node_id: String,
    topics: Topics,
    logger: Logger,
    transport: Arc<dyn Transport>,
    registry: NodeRegistry,
    services: Arc<ServiceRegistry>,
    dispatcher: ActionDispatcher,
    event_bus: EventBus,
    state: RwLock<HostState>,
    /// Serializes start, stop and register
    lifecycle: Mutex<()>,
    /// Last announcement timestamp, strictly increasing
    announce_clock: AtomicU64,
    /// Stops the heartbeat and sweep timers
    timers: CancellationToken,
    /// Stops the inbound workers
    workers: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A process instance of the mesh hosting zero or more services
///
/// Cloning a Node is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.inner.node_id)
            .field("namespace", &self.inner.topics.namespace())
            .finish()
    }
}

impl Node {
    /// Create a new Node with the given configuration and transport
    ///
    /// INTENTION: Set up all components without touching the transport yet.
    /// Register services, then call `start()`.
    pub async fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        config
            .logging_config
            .clone()
            .unwrap_or_else(LoggingConfig::default_info)
            .apply();

        let node_id = config.node_id.clone();
        let logger = Logger::new_root(Component::Node, &node_id);
        let topics = Topics::new(config.namespace.clone());

        let table = NodeTable::new(node_id.clone(), Liveness::from_grace(config.dead_node_grace()));
        let (registry, _actor) =
            NodeRegistry::spawn(table, logger.with_component(Component::Registry));

        let services = Arc::new(ServiceRegistry::new(logger.with_component(Component::Service)));

        let dispatcher = ActionDispatcher::new(
            node_id.clone(),
            topics.clone(),
            registry.clone(),
            Arc::clone(&services),
            Arc::clone(&transport),
            config.request_timeout(),
            config.retry_policy.clone(),
            logger.with_component(Component::Dispatcher),
        );

        let event_bus = EventBus::new(
            node_id.clone(),
            topics.clone(),
            registry.clone(),
            Arc::clone(&services),
            Arc::clone(&transport),
            logger.with_component(Component::EventBus),
        );

        logger.info(format!(
            "Node created in namespace '{}'",
            topics.namespace()
        ));

        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                node_id,
                topics,
                logger,
                transport,
                registry,
                services,
                dispatcher,
                event_bus,
                state: RwLock::new(HostState::Created),
                lifecycle: Mutex::new(()),
                announce_clock: AtomicU64::new(0),
                timers: CancellationToken::new(),
                workers: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> HostState {
        *self.inner.state.read().await
    }

    async fn set_state(&self, state: HostState) {
        *self.inner.state.write().await = state;
        self.inner.logger.debug(format!("Node is {}", state));
    }

    /// Register a service with this node
    ///
    /// Before start the service just joins the list; on a started node its
    /// `created` and `started` hooks run at once and the node re-announces.
    /// A rejected service leaves no trace.
    pub async fn register(&self, service: ServiceDefinition) -> Result<(), BrokerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let state = self.state().await;
        if matches!(state, HostState::Stopping | HostState::Stopped) {
            return Err(BrokerError::InvalidState(format!(
                "cannot register service '{}' on a {} node",
                service.name, state
            )));
        }

        let service = self.inner.services.register(service).await?;

        if state == HostState::Started {
            self.run_startup_hooks(&service)
                .await
                .map_err(|e| BrokerError::InvalidState(e.to_string()))?;
            if let Err(e) = self.announce().await {
                self.inner
                    .logger
                    .warn(format!("Failed to announce new service '{}': {}", service.name, e));
            }
        }
        Ok(())
    }

    /// Start the node
    ///
    /// Connects the transport, subscribes to the mesh topics, asks the mesh to
    /// introduce itself, runs every service's `created` then `started` hook in
    /// registration order, announces this node and starts the heartbeat.
    /// Starting a started node is a no-op; a stopped node cannot restart.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        match self.state().await {
            HostState::Created => {}
            HostState::Starting | HostState::Started => {
                self.inner.logger.warn("Node already running");
                return Ok(());
            }
            state @ (HostState::Stopping | HostState::Stopped) => {
                return Err(BrokerError::InvalidState(format!("cannot start a {} node", state)).into());
            }
        }

        self.inner.logger.info("Starting node...");
        self.set_state(HostState::Starting).await;

        match self.start_inner().await {
            Ok(()) => {
                self.set_state(HostState::Started).await;
                self.inner.logger.info("Node started");
                Ok(())
            }
            Err(e) => {
                self.inner.logger.error(format!("Node failed to start: {}", e));
                self.inner.timers.cancel();
                self.inner.workers.cancel();
                self.join_tasks().await;
                if let Err(disconnect_error) = self.inner.transport.disconnect().await {
                    self.inner
                        .logger
                        .warn(format!("Transport disconnect failed: {}", disconnect_error));
                }
                self.set_state(HostState::Stopped).await;
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<()> {
        connect_with_backoff(
            self.inner.transport.as_ref(),
            &self.inner.config.reconnect,
            &self.inner.logger.with_component(Component::Transport),
        )
        .await?;

        self.subscribe(self.inner.topics.discovery(), Inbound::Discovery)
            .await?;
        self.subscribe(self.inner.topics.request(&self.inner.node_id), Inbound::Request)
            .await?;
        self.subscribe(self.inner.topics.response(&self.inner.node_id), Inbound::Response)
            .await?;
        self.subscribe(self.inner.topics.all_events(), Inbound::Event)
            .await?;

        self.publish_discovery(Packet::Discover).await?;

        for service in self.inner.services.services().await {
            self.run_startup_hooks(&service).await?;
        }

        self.announce().await?;
        self.spawn_timers().await;
        Ok(())
    }

    /// Stop the node
    ///
    /// Runs `stopped` hooks in reverse registration order, tells the mesh this
    /// node is leaving, fails outstanding calls with `Cancelled` and
    /// disconnects. Stopping a node that never started skips the hooks.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        match self.state().await {
            HostState::Created => {
                self.set_state(HostState::Stopped).await;
                self.inner.logger.info("Node stopped before it was started");
                return Ok(());
            }
            HostState::Started => {}
            state => {
                self.inner.logger.warn(format!("Node is already {}", state));
                return Ok(());
            }
        }

        self.inner.logger.info("Stopping node...");
        self.set_state(HostState::Stopping).await;
        self.inner.timers.cancel();

        let services = self.inner.services.services().await;
        for service in services.iter().rev() {
            if let Err(e) = self
                .run_hook(&service.name, service.stopped.as_ref(), "stopped")
                .await
            {
                self.inner.logger.error(e.to_string());
            }
        }

        if let Err(e) = self.publish_discovery(Packet::Disconnect).await {
            self.inner
                .logger
                .warn(format!("Failed to announce disconnect: {}", e));
        }

        self.inner.dispatcher.cancel_all();
        self.inner.workers.cancel();
        self.join_tasks().await;

        if let Err(e) = self.inner.transport.disconnect().await {
            self.inner
                .logger
                .warn(format!("Transport disconnect failed: {}", e));
        }
        if let Err(e) = self.inner.registry.remove(&self.inner.node_id) {
            self.inner.logger.debug(e.to_string());
        }

        self.set_state(HostState::Stopped).await;
        self.inner.logger.info("Node stopped");
        Ok(())
    }

    async fn join_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                self.inner
                    .logger
                    .warn(format!("Background task ended abnormally: {}", e));
            }
        }
    }

    async fn run_startup_hooks(&self, service: &ServiceDefinition) -> Result<()> {
        self.run_hook(&service.name, service.created.as_ref(), "created")
            .await?;
        self.run_hook(&service.name, service.started.as_ref(), "started")
            .await
    }

    async fn run_hook(&self, service: &str, hook: Option<&LifecycleHook>, phase: &str) -> Result<()> {
        let Some(hook) = hook else {
            return Ok(());
        };
        self.inner
            .logger
            .debug(format!("Running {} hook of service '{}'", phase, service));
        let ctx = LifecycleContext::new(
            service,
            Arc::new(self.clone()),
            self.inner.logger.with_component(Component::Service),
        );
        hook(ctx)
            .await
            .map_err(|e| anyhow!("{} hook of service '{}' failed: {}", phase, service, e))
    }

    /// Call an action anywhere in the mesh with default options
    pub async fn call(&self, action: &str, params: Value) -> Result<Value, BrokerError> {
        self.call_with_options(action, params, CallOptions::default())
            .await
    }

    /// Call an action anywhere in the mesh
    pub async fn call_with_options(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, BrokerError> {
        self.ensure_running().await?;
        self.inner
            .dispatcher
            .call(action, params, options, Arc::new(self.clone()))
            .await
    }

    /// Deliver an event to every node with a matching subscription
    pub async fn broadcast(&self, event: &str, payload: Value) -> Result<(), BrokerError> {
        self.ensure_running().await?;
        self.inner
            .event_bus
            .broadcast(event, payload, Map::new())
            .await
    }

    /// Deliver an event to exactly one node with a matching subscription
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), BrokerError> {
        self.ensure_running().await?;
        self.inner.event_bus.emit(event, payload, Map::new()).await
    }

    async fn ensure_running(&self) -> Result<(), BrokerError> {
        match self.state().await {
            HostState::Starting | HostState::Started | HostState::Stopping => Ok(()),
            state => Err(BrokerError::InvalidState(format!("node is {}", state))),
        }
    }

    /// Alive nodes currently advertising an action
    pub async fn resolve(&self, action: &str) -> Result<Vec<String>> {
        self.inner.registry.resolve(action).await
    }

    /// Snapshot of every known node, this one included
    pub async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.inner.registry.nodes().await
    }

    /// Register a callback for node joins, updates, status changes and removals
    pub fn on_node_change(&self, callback: NodeChangeCallback) -> Result<()> {
        self.inner.registry.on_node_change(callback)
    }

    /// Replace the strategy picking the node that serves a call
    pub async fn set_load_balancer(&self, strategy: Arc<dyn LoadBalancingStrategy>) {
        self.inner.dispatcher.set_load_balancer(strategy).await;
    }

    /// Replace the strategy picking the receiver of an emitted event
    pub async fn set_emit_balancer(&self, strategy: Arc<dyn LoadBalancingStrategy>) {
        self.inner.event_bus.set_emit_balancer(strategy).await;
    }

    /// Number of calls waiting for a remote reply
    pub fn pending_calls(&self) -> usize {
        self.inner.dispatcher.pending_count()
    }

    fn next_timestamp(&self) -> u64 {
        let now = now_millis();
        let previous = self
            .inner
            .announce_clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        now.max(previous + 1)
    }

    /// Apply this node's capabilities locally and publish them to the mesh
    async fn announce(&self) -> Result<()> {
        let actions = self.inner.services.advertised_actions().await;
        let subscriptions = self.inner.services.subscriptions().await;
        let timestamp = self.next_timestamp();

        self.inner.registry.announce(Announcement {
            node_id: self.inner.node_id.clone(),
            actions: actions.clone(),
            subscriptions: subscriptions.clone(),
            timestamp,
        })?;

        let packet = AnnouncePacket {
            node_id: self.inner.node_id.clone(),
            actions: actions
                .into_iter()
                .map(|(name, timeout)| ActionInfo {
                    name,
                    timeout_ms: timeout.map(|t| t.as_millis() as u64),
                })
                .collect(),
            subscriptions,
            timestamp,
        };
        self.publish_discovery(Packet::Info(packet)).await
    }

    async fn publish_discovery(&self, packet: Packet) -> Result<()> {
        let bytes = Envelope::new(&self.inner.node_id, packet).encode()?;
        self.inner
            .transport
            .publish(&self.inner.topics.discovery(), bytes)
            .await
    }

    /// Route a transport subject into a fresh channel drained by one worker
    async fn subscribe(&self, subject: String, kind: Inbound) -> Result<()> {
        let (sender, receiver) = mpsc::unbounded_channel::<Vec<u8>>();
        let handler: MessageHandler = Arc::new(move |_topic, payload| {
            // Receiver is gone only after shutdown
            let _ = sender.send(payload);
        });
        self.inner.transport.subscribe(&subject, handler).await?;

        let node = self.clone();
        let task = tokio::spawn(async move { node.run_worker(kind, receiver).await });
        self.inner.tasks.lock().await.push(task);
        Ok(())
    }

    async fn run_worker(self, kind: Inbound, mut receiver: mpsc::UnboundedReceiver<Vec<u8>>) {
        let shutdown = self.inner.workers.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = receiver.recv() => match message {
                    Some(bytes) => self.handle_inbound(kind, &bytes).await,
                    None => break,
                },
            }
        }
        self.inner
            .logger
            .trace(format!("{:?} worker stopped", kind));
    }

    async fn handle_inbound(&self, kind: Inbound, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.inner
                    .logger
                    .warn(format!("Dropping undecodable {:?} message: {}", kind, e));
                return;
            }
        };
        let sender = envelope.sender;
        let from_self = sender == self.inner.node_id;

        match (kind, envelope.packet) {
            (Inbound::Discovery, Packet::Info(info)) => {
                if !from_self {
                    self.log_registry_error(self.inner.registry.announce(Announcement {
                        node_id: info.node_id,
                        actions: info
                            .actions
                            .into_iter()
                            .map(|a| (a.name, a.timeout_ms.map(Duration::from_millis)))
                            .collect(),
                        subscriptions: info.subscriptions,
                        timestamp: info.timestamp,
                    }));
                }
            }
            (Inbound::Discovery, Packet::Discover) => {
                if !from_self {
                    self.inner
                        .logger
                        .debug(format!("Node '{}' asked for announcements", sender));
                    if let Err(e) = self.announce().await {
                        self.inner.logger.warn(format!("Failed to announce: {}", e));
                    }
                }
            }
            (Inbound::Discovery, Packet::Disconnect) => {
                if !from_self {
                    self.log_registry_error(self.inner.registry.remove(&sender));
                }
            }
            (Inbound::Request, Packet::Request(request)) => {
                self.log_registry_error(self.inner.registry.heartbeat(&sender));
                let node = self.clone();
                tokio::spawn(async move {
                    let delegate: Arc<dyn NodeDelegate> = Arc::new(node.clone());
                    node.inner
                        .dispatcher
                        .handle_request(&sender, request, delegate)
                        .await;
                });
            }
            (Inbound::Response, Packet::Response(response)) => {
                self.log_registry_error(self.inner.registry.heartbeat(&sender));
                self.inner.dispatcher.complete(&sender, response);
            }
            (Inbound::Event, Packet::Event(event)) => {
                if !from_self {
                    self.log_registry_error(self.inner.registry.heartbeat(&sender));
                }
                self.inner
                    .event_bus
                    .handle_event(&sender, event, Arc::new(self.clone()))
                    .await;
            }
            (kind, packet) => {
                self.inner.logger.warn(format!(
                    "Ignoring {} packet from '{}' on the {:?} topic",
                    packet.type_name(),
                    sender,
                    kind
                ));
            }
        }
    }

    fn log_registry_error(&self, result: Result<()>) {
        if let Err(e) = result {
            self.inner.logger.error(e.to_string());
        }
    }

    /// Periodic announcement (heartbeat) and liveness sweep
    async fn spawn_timers(&self) {
        let heartbeat_period = self.inner.config.heartbeat_interval();
        let sweep_period = heartbeat_period
            .min(self.inner.config.dead_node_grace() / 4)
            .max(Duration::from_millis(10));

        let node = self.clone();
        let token = self.inner.timers.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = node.announce().await {
                            node.inner.logger.warn(format!("Heartbeat failed: {}", e));
                        }
                    }
                }
            }
        });

        let registry = self.inner.registry.clone();
        let logger = self.inner.logger.clone();
        let token = self.inner.timers.clone();
        let sweep = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + sweep_period, sweep_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = registry.sweep() {
                            logger.error(e.to_string());
                            break;
                        }
                    }
                }
            }
        });

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(heartbeat);
        tasks.push(sweep);
    }
}

#[async_trait]
impl NodeDelegate for Node {
    fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    async fn call_with_options(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, BrokerError> {
        Node::call_with_options(self, action, params, options).await
    }

    async fn broadcast_with_meta(
        &self,
        event: &str,
        payload: Value,
        meta: Map<String, Value>,
    ) -> Result<(), BrokerError> {
        self.ensure_running().await?;
        self.inner.event_bus.broadcast(event, payload, meta).await
    }

    async fn emit_with_meta(
        &self,
        event: &str,
        payload: Value,
        meta: Map<String, Value>,
    ) -> Result<(), BrokerError> {
        self.ensure_running().await?;
        self.inner.event_bus.emit(event, payload, meta).await
    }
}
