// Node Registry
//
// INTENTION: Keep one eventually-consistent view of the mesh per node. The
// `NodeTable` is owned by a single actor task and is only ever mutated by
// the commands it receives, in arrival order. Everything else talks to it
// through the cloneable `NodeRegistry` handle.
//
// Queries get their answer through a oneshot reply channel; mutations are
// fire-and-forget so the discovery worker never waits on the actor.

pub mod node_table;

pub use node_table::{
    ActionDescriptor, ActionEndpoint, Announcement, Liveness, NodeChange, NodeInfo, NodeStatus,
    NodeTable,
};

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::util::logging::Logger;

/// Callback invoked for every change to the node set
pub type NodeChangeCallback = Arc<dyn Fn(&NodeChange) + Send + Sync>;

enum RegistryCommand {
    Announce(Announcement),
    Heartbeat(String),
    Remove(String),
    Sweep(Instant),
    Resolve(String, oneshot::Sender<Vec<String>>),
    Describe(String, oneshot::Sender<Option<ActionDescriptor>>),
    ResolveEvent(String, oneshot::Sender<Vec<String>>),
    Nodes(oneshot::Sender<Vec<NodeInfo>>),
    OnNodeChange(NodeChangeCallback),
    /// Resolves once every earlier command has been applied
    Sync(oneshot::Sender<()>),
}

/// Handle to the registry actor
#[derive(Clone)]
pub struct NodeRegistry {
    sender: mpsc::UnboundedSender<RegistryCommand>,
}

impl NodeRegistry {
    /// Spawn the actor that owns `table`
    ///
    /// The actor stops once every handle has been dropped.
    pub fn spawn(table: NodeTable, logger: Logger) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_actor(table, receiver, logger));
        (Self { sender }, handle)
    }

    fn send(&self, command: RegistryCommand) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| anyhow!("Node registry has stopped"))
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await.map_err(|_| anyhow!("Node registry has stopped"))
    }

    /// Merge a node's announcement
    pub fn announce(&self, announcement: Announcement) -> Result<()> {
        self.send(RegistryCommand::Announce(announcement))
    }

    /// Record a sign of life from a node
    pub fn heartbeat(&self, node_id: &str) -> Result<()> {
        self.send(RegistryCommand::Heartbeat(node_id.to_string()))
    }

    /// Drop a node that announced its departure
    pub fn remove(&self, node_id: &str) -> Result<()> {
        self.send(RegistryCommand::Remove(node_id.to_string()))
    }

    /// Apply liveness thresholds as of now
    pub fn sweep(&self) -> Result<()> {
        self.send(RegistryCommand::Sweep(Instant::now()))
    }

    pub fn sweep_at(&self, now: Instant) -> Result<()> {
        self.send(RegistryCommand::Sweep(now))
    }

    /// Alive nodes advertising `action`; empty means unavailable
    pub async fn resolve(&self, action: &str) -> Result<Vec<String>> {
        let action = action.to_string();
        self.ask(|tx| RegistryCommand::Resolve(action, tx)).await
    }

    pub async fn descriptor(&self, action: &str) -> Result<Option<ActionDescriptor>> {
        let action = action.to_string();
        self.ask(|tx| RegistryCommand::Describe(action, tx)).await
    }

    /// Alive nodes with a pattern matching `event`
    pub async fn resolve_event(&self, event: &str) -> Result<Vec<String>> {
        let event = event.to_string();
        self.ask(|tx| RegistryCommand::ResolveEvent(event, tx)).await
    }

    pub async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.ask(RegistryCommand::Nodes).await
    }

    /// Register a callback for joins, updates, status changes and removals
    pub fn on_node_change(&self, callback: NodeChangeCallback) -> Result<()> {
        self.send(RegistryCommand::OnNodeChange(callback))
    }

    /// Wait until all previously sent commands are applied
    pub async fn sync(&self) -> Result<()> {
        self.ask(RegistryCommand::Sync).await
    }
}

async fn run_actor(
    mut table: NodeTable,
    mut receiver: mpsc::UnboundedReceiver<RegistryCommand>,
    logger: Logger,
) {
    let mut callbacks: Vec<NodeChangeCallback> = Vec::new();

    while let Some(command) = receiver.recv().await {
        let changes = match command {
            RegistryCommand::Announce(announcement) => table.announce(announcement, Instant::now()),
            RegistryCommand::Heartbeat(node_id) => table.heartbeat(&node_id, Instant::now()),
            RegistryCommand::Remove(node_id) => table.remove(&node_id),
            RegistryCommand::Sweep(now) => table.sweep(now),
            RegistryCommand::Resolve(action, reply) => {
                let _ = reply.send(table.resolve(&action));
                continue;
            }
            RegistryCommand::Describe(action, reply) => {
                let _ = reply.send(table.descriptor(&action));
                continue;
            }
            RegistryCommand::ResolveEvent(event, reply) => {
                let _ = reply.send(table.resolve_event(&event));
                continue;
            }
            RegistryCommand::Nodes(reply) => {
                let _ = reply.send(table.nodes());
                continue;
            }
            RegistryCommand::OnNodeChange(callback) => {
                callbacks.push(callback);
                continue;
            }
            RegistryCommand::Sync(reply) => {
                let _ = reply.send(());
                continue;
            }
        };

        for change in &changes {
            log_change(&logger, change);
            for callback in &callbacks {
                callback(change);
            }
        }
    }

    logger.debug("Registry actor stopped");
}

fn log_change(logger: &Logger, change: &NodeChange) {
    match change {
        NodeChange::Joined(id) => logger.info(format!("Node '{}' joined", id)),
        NodeChange::Updated(id) => logger.debug(format!("Node '{}' updated its capabilities", id)),
        NodeChange::StatusChanged { node_id, from, to } => {
            logger.info(format!("Node '{}' is now {} (was {})", node_id, to, from))
        }
        NodeChange::Removed(id) => logger.info(format!("Node '{}' removed", id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::logging::Component;
    use std::sync::Mutex;
    use std::time::Duration;

    fn spawn_registry() -> NodeRegistry {
        let table = NodeTable::new("local", Liveness::from_grace(Duration::from_secs(10)));
        let (registry, _handle) =
            NodeRegistry::spawn(table, Logger::new_root(Component::Registry, "local"));
        registry
    }

    fn announcement(node_id: &str, actions: &[&str], ts: u64) -> Announcement {
        Announcement {
            node_id: node_id.to_string(),
            actions: actions.iter().map(|a| (a.to_string(), None)).collect(),
            subscriptions: vec![],
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_announcements_are_applied_in_order() {
        let registry = spawn_registry();
        registry.announce(announcement("a", &["math.add"], 1)).unwrap();
        registry.announce(announcement("a", &["math.sub"], 2)).unwrap();

        assert!(registry.resolve("math.add").await.unwrap().is_empty());
        assert_eq!(registry.resolve("math.sub").await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_callbacks_see_every_change() {
        let registry = spawn_registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .on_node_change(Arc::new(move |change| sink.lock().unwrap().push(change.clone())))
            .unwrap();

        registry.announce(announcement("a", &["math.add"], 1)).unwrap();
        registry.remove("a").unwrap();
        registry.sync().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&NodeChange::Joined("a".to_string())));
        assert_eq!(seen.last(), Some(&NodeChange::Removed("a".to_string())));
        assert_eq!(seen.len(), 4);
    }

    #[tokio::test]
    async fn test_sweep_at_excludes_silent_nodes() {
        let registry = spawn_registry();
        registry.announce(announcement("a", &["math.add"], 1)).unwrap();
        registry.sync().await.unwrap();

        registry
            .sweep_at(Instant::now() + Duration::from_secs(11))
            .unwrap();
        assert!(registry.resolve("math.add").await.unwrap().is_empty());
        assert!(registry.nodes().await.unwrap().is_empty());
    }
}
