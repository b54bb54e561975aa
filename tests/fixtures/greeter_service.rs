use mesh_node::routing::service_of;
use mesh_node::ServiceDefinition;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared log of what happened inside a greeter service
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Greeter service that records its lifecycle hooks and received events
///
/// `name` becomes the service name, so several greeters can live on one
/// node and their hooks can be told apart.
pub fn greeter_service(name: &str, journal: Journal) -> ServiceDefinition {
    let created = Arc::clone(&journal);
    let started = Arc::clone(&journal);
    let stopped = Arc::clone(&journal);
    let events = Arc::clone(&journal);

    ServiceDefinition::new(name)
        .action("hello", |ctx| async move {
            let who: String = ctx.param("name").unwrap_or_else(|_| "world".to_string());
            Ok(json!(format!("Hello, {}!", who)))
        })
        .action("caller", |ctx| async move {
            Ok(json!({
                "caller": ctx.caller,
                "level": ctx.level,
                "requestId": ctx.request_id,
                "parentId": ctx.parent_id,
                "meta": ctx.meta,
            }))
        })
        // Nested call; the callee sees level 2 and the same request id
        .action("relay", |ctx| async move {
            let service = service_of(&ctx.action).to_string();
            let inner = ctx.call(&format!("{}.caller", service), json!({})).await?;
            Ok(json!({"outer": ctx.request_id, "inner": inner}))
        })
        .action_with_timeout("slow", Duration::from_millis(50), |_ctx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("too late"))
        })
        .event("greetings.**", move |ctx| {
            let events = Arc::clone(&events);
            async move {
                events
                    .lock()
                    .unwrap()
                    .push(format!("event:{}:{}", ctx.node_id(), ctx.event));
                Ok(())
            }
        })
        .on_created(move |ctx| {
            let created = Arc::clone(&created);
            async move {
                created.lock().unwrap().push(format!("created:{}", ctx.service_name));
                Ok(())
            }
        })
        .on_started(move |ctx| {
            let started = Arc::clone(&started);
            async move {
                started.lock().unwrap().push(format!("started:{}", ctx.service_name));
                Ok(())
            }
        })
        .on_stopped(move |ctx| {
            let stopped = Arc::clone(&stopped);
            async move {
                stopped.lock().unwrap().push(format!("stopped:{}", ctx.service_name));
                Ok(())
            }
        })
}
