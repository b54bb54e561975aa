// Node Table
//
// INTENTION: Hold the routing state of the mesh: which nodes are known, what
// each one advertises, and how alive each one is. The table is plain
// synchronous state driven by explicit instants, so liveness rules can be
// tested without timers. The `NodeRegistry` actor owns the only instance.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::routing::PathTrie;

/// Liveness of a known node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Alive,
    Suspect,
    Dead,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Alive => write!(f, "alive"),
            NodeStatus::Suspect => write!(f, "suspect"),
            NodeStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Capabilities a node advertises about itself
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub node_id: String,
    /// Action name to optional timeout override
    pub actions: Vec<(String, Option<Duration>)>,
    pub subscriptions: Vec<String>,
    pub timestamp: u64,
}

/// Change to the node set, reported to `on_node_change` callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeChange {
    Joined(String),
    /// Capabilities changed on a known node
    Updated(String),
    StatusChanged {
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },
    Removed(String),
}

/// One node that can serve an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEndpoint {
    pub node_id: String,
    pub timeout: Option<Duration>,
    pub local: bool,
}

/// Alive endpoints of one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub name: String,
    pub endpoints: Vec<ActionEndpoint>,
}

impl ActionDescriptor {
    pub fn node_ids(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.node_id.clone()).collect()
    }

    pub fn endpoint(&self, node_id: &str) -> Option<&ActionEndpoint> {
        self.endpoints.iter().find(|e| e.node_id == node_id)
    }
}

/// Snapshot of a node for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: String,
    pub status: NodeStatus,
    pub local: bool,
    pub actions: Vec<String>,
    pub subscriptions: Vec<String>,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    actions: HashMap<String, Option<Duration>>,
    subscriptions: Vec<String>,
    last_heartbeat: Instant,
    status: NodeStatus,
    timestamp: u64,
    local: bool,
}

/// Liveness thresholds
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    pub suspect_after: Duration,
    pub dead_after: Duration,
}

impl Liveness {
    /// Suspect after half the grace period, dead after all of it
    pub fn from_grace(grace: Duration) -> Self {
        Self {
            suspect_after: grace / 2,
            dead_after: grace,
        }
    }
}

/// Routing state of the mesh
pub struct NodeTable {
    local_node_id: String,
    liveness: Liveness,
    nodes: HashMap<String, NodeEntry>,
    /// Action name to owning node ids
    action_index: HashMap<String, BTreeSet<String>>,
    /// Event patterns to owning node ids
    event_index: PathTrie<String>,
}

impl NodeTable {
    pub fn new(local_node_id: impl Into<String>, liveness: Liveness) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            liveness,
            nodes: HashMap::new(),
            action_index: HashMap::new(),
            event_index: PathTrie::new(),
        }
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.nodes.get(node_id).map(|n| n.status)
    }

    /// Merge an announcement (last write wins per node)
    ///
    /// An announcement also counts as a heartbeat. Announcements older than
    /// the one already applied are ignored.
    pub fn announce(&mut self, announcement: Announcement, now: Instant) -> Vec<NodeChange> {
        let mut changes = Vec::new();
        let node_id = announcement.node_id.clone();
        let local = node_id == self.local_node_id;

        let actions: HashMap<String, Option<Duration>> =
            announcement.actions.into_iter().collect();

        match self.nodes.get(&node_id) {
            Some(existing) if announcement.timestamp < existing.timestamp => {
                return changes;
            }
            Some(existing)
                if existing.actions == actions
                    && existing.subscriptions == announcement.subscriptions =>
            {
                // Same capabilities, only refresh liveness
                let timestamp = announcement.timestamp;
                changes.extend(self.touch(&node_id, now));
                if let Some(entry) = self.nodes.get_mut(&node_id) {
                    entry.timestamp = timestamp;
                }
                return changes;
            }
            Some(_) => {
                changes.extend(self.touch(&node_id, now));
                self.unindex(&node_id);
                changes.push(NodeChange::Updated(node_id.clone()));
            }
            None => {
                changes.push(NodeChange::Joined(node_id.clone()));
            }
        }

        let status = self
            .nodes
            .get(&node_id)
            .map(|n| n.status)
            .unwrap_or(NodeStatus::Alive);

        self.nodes.insert(
            node_id.clone(),
            NodeEntry {
                actions,
                subscriptions: announcement.subscriptions,
                last_heartbeat: now,
                status,
                timestamp: announcement.timestamp,
                local,
            },
        );
        self.index(&node_id);
        changes
    }

    /// Record a sign of life from a known node
    pub fn heartbeat(&mut self, node_id: &str, now: Instant) -> Vec<NodeChange> {
        self.touch(node_id, now)
    }

    fn touch(&mut self, node_id: &str, now: Instant) -> Vec<NodeChange> {
        let mut changes = Vec::new();
        if let Some(entry) = self.nodes.get_mut(node_id) {
            entry.last_heartbeat = now;
            if entry.status == NodeStatus::Suspect {
                entry.status = NodeStatus::Alive;
                changes.push(NodeChange::StatusChanged {
                    node_id: node_id.to_string(),
                    from: NodeStatus::Suspect,
                    to: NodeStatus::Alive,
                });
            }
        }
        changes
    }

    /// Alive nodes advertising an action, in stable order
    pub fn resolve(&self, action: &str) -> Vec<String> {
        self.descriptor(action)
            .map(|d| d.node_ids())
            .unwrap_or_default()
    }

    /// Alive endpoints of an action, or `None` when unavailable
    pub fn descriptor(&self, action: &str) -> Option<ActionDescriptor> {
        let owners = self.action_index.get(action)?;
        let endpoints: Vec<ActionEndpoint> = owners
            .iter()
            .filter_map(|id| {
                let entry = self.nodes.get(id)?;
                if entry.status != NodeStatus::Alive {
                    return None;
                }
                Some(ActionEndpoint {
                    node_id: id.clone(),
                    timeout: entry.actions.get(action).copied().flatten(),
                    local: entry.local,
                })
            })
            .collect();

        if endpoints.is_empty() {
            None
        } else {
            Some(ActionDescriptor {
                name: action.to_string(),
                endpoints,
            })
        }
    }

    /// Alive nodes with at least one pattern matching the event, in stable order
    pub fn resolve_event(&self, event: &str) -> Vec<String> {
        let matches: BTreeSet<String> = self
            .event_index
            .find_matches(event)
            .into_iter()
            .filter(|id| self.status(id) == Some(NodeStatus::Alive))
            .collect();
        matches.into_iter().collect()
    }

    /// Drop a node at once (graceful disconnect)
    ///
    /// The node still walks alive → suspect → dead before removal.
    pub fn remove(&mut self, node_id: &str) -> Vec<NodeChange> {
        let mut changes = Vec::new();
        let Some(status) = self.status(node_id) else {
            return changes;
        };

        if status == NodeStatus::Alive {
            changes.push(self.set_status(node_id, NodeStatus::Suspect));
        }
        changes.push(self.set_status(node_id, NodeStatus::Dead));
        self.unindex(node_id);
        self.nodes.remove(node_id);
        changes.push(NodeChange::Removed(node_id.to_string()));
        changes
    }

    fn set_status(&mut self, node_id: &str, to: NodeStatus) -> NodeChange {
        let from = match self.nodes.get_mut(node_id) {
            Some(entry) => std::mem::replace(&mut entry.status, to),
            None => to,
        };
        NodeChange::StatusChanged {
            node_id: node_id.to_string(),
            from,
            to,
        }
    }

    /// Apply liveness thresholds as of `now`
    ///
    /// Remote nodes silent for `suspect_after` become suspect; suspect nodes
    /// silent for `dead_after` become dead and are removed. The local node is
    /// never swept.
    pub fn sweep(&mut self, now: Instant) -> Vec<NodeChange> {
        let mut changes = Vec::new();
        let mut ids: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, entry)| !entry.local)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        for id in ids {
            let Some(entry) = self.nodes.get(&id) else {
                continue;
            };
            let silent = now.saturating_duration_since(entry.last_heartbeat);

            if entry.status == NodeStatus::Alive && silent >= self.liveness.suspect_after {
                changes.push(self.set_status(&id, NodeStatus::Suspect));
            }
            if self.status(&id) == Some(NodeStatus::Suspect) && silent >= self.liveness.dead_after
            {
                changes.push(self.set_status(&id, NodeStatus::Dead));
                self.unindex(&id);
                self.nodes.remove(&id);
                changes.push(NodeChange::Removed(id.clone()));
            }
        }
        changes
    }

    /// Snapshot of all known nodes, sorted by id
    pub fn nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .nodes
            .iter()
            .map(|(id, entry)| {
                let mut actions: Vec<String> = entry.actions.keys().cloned().collect();
                actions.sort();
                NodeInfo {
                    id: id.clone(),
                    status: entry.status,
                    local: entry.local,
                    actions,
                    subscriptions: entry.subscriptions.clone(),
                }
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    fn index(&mut self, node_id: &str) {
        let Some(entry) = self.nodes.get(node_id) else {
            return;
        };
        for action in entry.actions.keys() {
            self.action_index
                .entry(action.clone())
                .or_default()
                .insert(node_id.to_string());
        }
        for pattern in &entry.subscriptions {
            self.event_index
                .add_handler(pattern, node_id.to_string());
        }
    }

    fn unindex(&mut self, node_id: &str) {
        let Some(entry) = self.nodes.get(node_id) else {
            return;
        };
        for action in entry.actions.keys() {
            if let Some(owners) = self.action_index.get_mut(action) {
                owners.remove(node_id);
                if owners.is_empty() {
                    self.action_index.remove(action);
                }
            }
        }
        for pattern in &entry.subscriptions {
            self.event_index.remove_handler(pattern, |id| id == node_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(10);

    fn table() -> NodeTable {
        NodeTable::new("local", Liveness::from_grace(GRACE))
    }

    fn announcement(node_id: &str, actions: &[&str], subscriptions: &[&str], ts: u64) -> Announcement {
        Announcement {
            node_id: node_id.to_string(),
            actions: actions.iter().map(|a| (a.to_string(), None)).collect(),
            subscriptions: subscriptions.iter().map(|s| s.to_string()).collect(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_announce_then_resolve() {
        let mut table = table();
        let now = Instant::now();
        let changes = table.announce(announcement("a", &["math.add"], &[], 1), now);
        assert_eq!(changes, vec![NodeChange::Joined("a".to_string())]);
        table.announce(announcement("b", &["math.add", "math.sub"], &[], 1), now);

        assert_eq!(table.resolve("math.add"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.resolve("math.sub"), vec!["b".to_string()]);
        assert!(table.resolve("ghost.act").is_empty());
        assert!(table.descriptor("ghost.act").is_none());
    }

    #[test]
    fn test_announce_is_idempotent_and_last_write_wins() {
        let mut table = table();
        let now = Instant::now();
        table.announce(announcement("a", &["math.add"], &[], 2), now);

        // Replaying the same announcement changes nothing
        assert!(table
            .announce(announcement("a", &["math.add"], &[], 2), now)
            .is_empty());

        // An older announcement arriving late is ignored
        table.announce(announcement("a", &["old.action"], &[], 1), now);
        assert!(table.resolve("old.action").is_empty());

        // A newer one replaces capabilities
        let changes = table.announce(announcement("a", &["math.mul"], &["x.*"], 3), now);
        assert_eq!(changes, vec![NodeChange::Updated("a".to_string())]);
        assert!(table.resolve("math.add").is_empty());
        assert_eq!(table.resolve("math.mul"), vec!["a".to_string()]);
        assert_eq!(table.resolve_event("x.y"), vec!["a".to_string()]);
    }

    #[test]
    fn test_per_action_timeout_is_kept() {
        let mut table = table();
        let mut a = announcement("a", &[], &[], 1);
        a.actions.push(("slow.op".to_string(), Some(Duration::from_millis(250))));
        table.announce(a, Instant::now());

        let descriptor = table.descriptor("slow.op").unwrap();
        assert_eq!(
            descriptor.endpoint("a").unwrap().timeout,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_silent_node_walks_suspect_then_dead() {
        let mut table = table();
        let start = Instant::now();
        table.announce(announcement("a", &["math.add"], &["x.**"], 1), start);

        assert!(table.sweep(start + Duration::from_secs(4)).is_empty());

        let changes = table.sweep(start + Duration::from_secs(5));
        assert_eq!(
            changes,
            vec![NodeChange::StatusChanged {
                node_id: "a".to_string(),
                from: NodeStatus::Alive,
                to: NodeStatus::Suspect,
            }]
        );
        // Suspect nodes are already out of routing
        assert!(table.resolve("math.add").is_empty());
        assert!(table.resolve_event("x.y").is_empty());

        let changes = table.sweep(start + GRACE);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1], NodeChange::Removed("a".to_string()));
        assert!(!table.contains("a"));
    }

    #[test]
    fn test_long_silence_never_skips_suspect() {
        let mut table = table();
        let start = Instant::now();
        table.announce(announcement("a", &["math.add"], &[], 1), start);

        let changes = table.sweep(start + GRACE * 3);
        assert_eq!(
            changes,
            vec![
                NodeChange::StatusChanged {
                    node_id: "a".to_string(),
                    from: NodeStatus::Alive,
                    to: NodeStatus::Suspect,
                },
                NodeChange::StatusChanged {
                    node_id: "a".to_string(),
                    from: NodeStatus::Suspect,
                    to: NodeStatus::Dead,
                },
                NodeChange::Removed("a".to_string()),
            ]
        );
    }

    #[test]
    fn test_heartbeat_brings_suspect_back() {
        let mut table = table();
        let start = Instant::now();
        table.announce(announcement("a", &["math.add"], &[], 1), start);
        table.sweep(start + Duration::from_secs(6));
        assert_eq!(table.status("a"), Some(NodeStatus::Suspect));

        let changes = table.heartbeat("a", start + Duration::from_secs(7));
        assert_eq!(changes.len(), 1);
        assert_eq!(table.resolve("math.add"), vec!["a".to_string()]);

        // Silence is measured from the latest heartbeat
        assert!(table.sweep(start + Duration::from_secs(11)).is_empty());
    }

    #[test]
    fn test_local_node_is_never_swept() {
        let mut table = table();
        let start = Instant::now();
        table.announce(announcement("local", &["math.add"], &[], 1), start);

        assert!(table.sweep(start + GRACE * 10).is_empty());
        let descriptor = table.descriptor("math.add").unwrap();
        assert!(descriptor.endpoints[0].local);
    }

    #[test]
    fn test_remove_walks_through_suspect() {
        let mut table = table();
        table.announce(announcement("a", &["math.add"], &["x.*"], 1), Instant::now());

        let changes = table.remove("a");
        assert_eq!(changes.len(), 3);
        assert!(table.resolve("math.add").is_empty());
        assert!(table.resolve_event("x.y").is_empty());
        assert!(table.remove("a").is_empty());
    }

    #[test]
    fn test_event_resolution_deduplicates_nodes() {
        let mut table = table();
        let now = Instant::now();
        table.announce(announcement("a", &[], &["x.y", "x.*", "x.**"], 1), now);
        table.announce(announcement("b", &[], &["a.*", "x.y.z"], 1), now);
        table.announce(announcement("c", &[], &["x.*"], 1), now);

        assert_eq!(
            table.resolve_event("x.y"),
            vec!["a".to_string(), "c".to_string()]
        );
        assert_eq!(table.resolve_event("x.y.z"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_rejoin_after_removal() {
        let mut table = table();
        let start = Instant::now();
        table.announce(announcement("a", &["math.add"], &[], 1), start);
        table.sweep(start + GRACE);
        assert!(!table.contains("a"));

        let changes = table.announce(announcement("a", &["math.add"], &[], 2), start + GRACE);
        assert_eq!(changes, vec![NodeChange::Joined("a".to_string())]);
        assert_eq!(table.resolve("math.add"), vec!["a".to_string()]);
    }
}
