// Root module for the mesh_node crate
//
// INTENTION: Define the node runtime of a service mesh: hosting services,
// keeping a view of the other nodes, routing calls to one healthy node and
// relaying events, all over a pluggable publish/subscribe transport.

//! # Mesh Node
//!
//! A mesh is a set of nodes sharing one transport namespace. Each node hosts
//! services, learns which node offers which action from periodic
//! announcements, and routes every call to exactly one alive node.
//!
//! ## Core Components
//!
//! - **Node**: hosts services and wires them into the mesh
//! - **NodeRegistry**: eventually-consistent view of the other nodes and their liveness
//! - **ActionDispatcher**: call routing, load balancing, timeouts and retries
//! - **EventBus**: broadcast (every subscriber) and emit (exactly one subscriber)
//! - **Transport**: publish/subscribe adapter; `MemoryTransport` runs a whole mesh in one process
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mesh_node::{MemoryBus, Node, NodeConfig, ServiceDefinition};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let bus = MemoryBus::new();
//!     let node = Node::new(NodeConfig::new("node-a"), Arc::new(bus.transport())).await?;
//!
//!     node.register(ServiceDefinition::new("math").action("add", |ctx| async move {
//!         let a: f64 = ctx.param("a")?;
//!         let b: f64 = ctx.param("b")?;
//!         Ok(json!(a + b))
//!     }))
//!     .await?;
//!     node.start().await?;
//!
//!     let sum = node.call("math.add", json!({"a": 2, "b": 3})).await?;
//!     assert_eq!(sum, json!(5.0));
//!
//!     node.broadcast("math.used", json!({"by": "example"})).await?;
//!     node.stop().await
//! }
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod network;
pub mod node;
pub mod registry;
pub mod routing;
pub mod services;
pub mod util;

// Re-export the main types from the node module
pub use node::{HostState, Node, NodeConfig};

pub use config::{LogLevel, LoggingConfig, ReconnectPolicy, RetryPolicy, RetrySelection};
pub use error::{ActionError, BrokerError};

// Re-export the main types from the services module
pub use services::{
    CallOptions, EventContext, LifecycleContext, LoadBalancingStrategy, NodeDelegate,
    RandomLoadBalancer, RequestContext, RoundRobinLoadBalancer, ServiceDefinition,
};

// Re-export the main types from the registry and network modules
pub use network::{MemoryBus, MemoryTransport, MessageHandler, Transport};
pub use registry::{NodeChange, NodeInfo, NodeStatus};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
