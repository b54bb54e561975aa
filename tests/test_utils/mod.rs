use anyhow::Result;
use mesh_node::network::{ActionInfo, AnnouncePacket, Envelope, Packet};
use mesh_node::routing::Topics;
use mesh_node::{
    LogLevel, LoggingConfig, MemoryBus, MemoryTransport, Node, NodeConfig, ServiceDefinition,
    Transport,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "test";

/// NodeConfig with short intervals suited to tests
pub fn test_config(node_id: &str) -> NodeConfig {
    NodeConfig::new(node_id)
        .with_namespace(NAMESPACE)
        .with_request_timeout(Duration::from_secs(2))
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_dead_node_grace(Duration::from_secs(10))
        .with_logging_config(LoggingConfig::new().with_default_level(LogLevel::Warn))
}

/// Create a node on `bus`, register `services` and start it
pub async fn start_node(bus: &MemoryBus, config: NodeConfig, services: Vec<ServiceDefinition>) -> Result<Node> {
    let node = Node::new(config, Arc::new(bus.transport())).await?;
    for service in services {
        node.register(service).await?;
    }
    node.start().await?;
    Ok(node)
}

/// Poll `condition` every 10ms until it holds or `limit` elapses
pub async fn wait_for<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `node` routes `action` to exactly `count` alive nodes
pub async fn wait_for_action(node: &Node, action: &str, count: usize) -> bool {
    wait_for(Duration::from_secs(2), move || async move {
        node.resolve(action).await.map(|n| n.len() == count).unwrap_or(false)
    })
    .await
}

/// Wait until `node` knows `count` nodes, itself included
pub async fn wait_for_nodes(node: &Node, count: usize) -> bool {
    wait_for(Duration::from_secs(2), move || async move {
        node.nodes().await.map(|n| n.len() == count).unwrap_or(false)
    })
    .await
}

/// A bare transport that announces actions and never answers requests
pub async fn silent_node(bus: &MemoryBus, node_id: &str, actions: &[&str]) -> Result<MemoryTransport> {
    let transport = bus.transport();
    transport.connect().await?;
    announce_raw(&transport, node_id, actions, 1).await?;
    Ok(transport)
}

/// Publish an announcement as `node_id` on the discovery topic
pub async fn announce_raw(transport: &MemoryTransport, node_id: &str, actions: &[&str], timestamp: u64) -> Result<()> {
    let packet = Packet::Info(AnnouncePacket {
        node_id: node_id.to_string(),
        actions: actions
            .iter()
            .map(|name| ActionInfo {
                name: name.to_string(),
                timeout_ms: None,
            })
            .collect(),
        subscriptions: vec![],
        timestamp,
    });
    let bytes = Envelope::new(node_id, packet).encode()?;
    transport
        .publish(&Topics::new(NAMESPACE).discovery(), bytes)
        .await
}

/// Shared list of received events
pub type Received = Arc<Mutex<Vec<String>>>;

/// Service with one event subscription that records `<node>:<event>`
pub fn recorder(name: &str, pattern: &str, received: Received) -> ServiceDefinition {
    ServiceDefinition::new(name).event(pattern, move |ctx| {
        let received = Arc::clone(&received);
        async move {
            received
                .lock()
                .unwrap()
                .push(format!("{}:{}", ctx.node_id(), ctx.event));
            Ok(())
        }
    })
}
