use anyhow::Result;
use mesh_node::{MemoryBus, Node, RoundRobinLoadBalancer};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Import test utilities
#[allow(dead_code)]
mod test_utils {
    include!("test_utils/mod.rs");
}

use test_utils::{recorder, start_node, test_config, wait_for, wait_for_nodes, Received};

fn received() -> Received {
    Arc::new(Mutex::new(Vec::new()))
}

fn snapshot(received: &Received) -> Vec<String> {
    let mut entries = received.lock().unwrap().clone();
    entries.sort();
    entries
}

async fn wait_for_count(received: &Received, count: usize) -> bool {
    wait_for(Duration::from_secs(2), || {
        let len = received.lock().unwrap().len();
        async move { len >= count }
    })
    .await
}

#[tokio::test]
async fn test_broadcast_reaches_every_matching_node() -> Result<()> {
    let bus = MemoryBus::new();
    let seen = received();
    let a = start_node(&bus, test_config("node-a"), vec![recorder("tester", "test.**", seen.clone())]).await?;
    let b = start_node(&bus, test_config("node-b"), vec![recorder("tester", "test.**", seen.clone())]).await?;

    a.broadcast("test.run", json!({})).await?;

    assert!(wait_for_count(&seen, 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(snapshot(&seen), vec!["node-a:test.run", "node-b:test.run"]);

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_broadcast_follows_pattern_rules() -> Result<()> {
    let bus = MemoryBus::new();
    let seen = received();
    let mut nodes: Vec<Node> = Vec::new();
    for (id, pattern) in [
        ("exact", "x.y"),
        ("single", "x.*"),
        ("multi", "x.**"),
        ("other", "a.*"),
        ("deeper", "x.y.z"),
    ] {
        nodes.push(start_node(&bus, test_config(id), vec![recorder("listener", pattern, seen.clone())]).await?);
    }
    let publisher = start_node(&bus, test_config("publisher"), vec![]).await?;

    publisher.broadcast("x.y", json!({"n": 1})).await?;

    assert!(wait_for_count(&seen, 3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(snapshot(&seen), vec!["exact:x.y", "multi:x.y", "single:x.y"]);
    Ok(())
}

#[tokio::test]
async fn test_every_matching_handler_on_a_node_runs() -> Result<()> {
    let bus = MemoryBus::new();
    let seen = received();
    let node = start_node(
        &bus,
        test_config("node-a"),
        vec![
            recorder("first", "orders.*", seen.clone()),
            recorder("second", "orders.created", seen.clone()),
        ],
    )
    .await?;

    node.broadcast("orders.created", json!({})).await?;
    assert!(wait_for_count(&seen, 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_emit_reaches_exactly_one_node() -> Result<()> {
    let bus = MemoryBus::new();
    let seen = received();
    let mut workers = Vec::new();
    for id in ["worker-1", "worker-2", "worker-3"] {
        workers.push(start_node(&bus, test_config(id), vec![recorder("jobs", "jobs.*", seen.clone())]).await?);
    }
    let producer = start_node(&bus, test_config("producer"), vec![]).await?;
    producer
        .set_emit_balancer(Arc::new(RoundRobinLoadBalancer::new()))
        .await;
    assert!(wait_for_nodes(&producer, 4).await);

    producer.emit("jobs.run", json!({"job": 1})).await?;
    assert!(wait_for_count(&seen, 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    // Round robin over the three subscribers hands each one a job
    producer.emit("jobs.run", json!({"job": 2})).await?;
    producer.emit("jobs.run", json!({"job": 3})).await?;
    assert!(wait_for_count(&seen, 3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut per_node: HashMap<String, usize> = HashMap::new();
    for entry in snapshot(&seen) {
        let node = entry.split(':').next().unwrap_or_default().to_string();
        *per_node.entry(node).or_default() += 1;
    }
    assert_eq!(per_node.len(), 3);
    assert!(per_node.values().all(|count| *count == 1));
    Ok(())
}

#[tokio::test]
async fn test_emit_without_subscribers_is_dropped() -> Result<()> {
    let bus = MemoryBus::new();
    let node = start_node(&bus, test_config("node-a"), vec![]).await?;

    node.emit("nobody.listens", json!({})).await?;

    let err = node.broadcast("bad..name", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidName");
    let err = node.emit("jobs.*", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidName");
    Ok(())
}

#[tokio::test]
async fn test_failing_handler_does_not_stop_delivery() -> Result<()> {
    let bus = MemoryBus::new();
    let seen = received();
    let failing = mesh_node::ServiceDefinition::new("failing").event("alerts.*", |_ctx| async move {
        Err::<(), _>(anyhow::anyhow!("handler failed"))
    });
    let node = start_node(
        &bus,
        test_config("node-a"),
        vec![failing, recorder("ok", "alerts.*", seen.clone())],
    )
    .await?;

    node.broadcast("alerts.fire", json!({})).await?;
    node.broadcast("alerts.flood", json!({})).await?;
    assert!(wait_for_count(&seen, 2).await);
    assert_eq!(
        snapshot(&seen),
        vec!["node-a:alerts.fire", "node-a:alerts.flood"]
    );
    Ok(())
}
