// Service Registry Module
//
// INTENTION:
// Keep track of the services hosted by this node: their action handlers and
// event handlers. The registry never calls a handler itself; the dispatcher
// and the event bus look handlers up here and run them.
//
// ARCHITECTURAL PRINCIPLES:
// 1. Registration is all-or-nothing: a rejected service leaves no trace
// 2. Registration order is preserved for lifecycle hooks
// 3. Event patterns are precomputed into a PathTrie at registration time

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::service::{ActionHandler, EventHandler, ServiceDefinition};
use crate::error::BrokerError;
use crate::routing::{validate_action_name, validate_event_pattern, PathTrie};
use crate::util::logging::Logger;

/// Locally hosted action
#[derive(Clone)]
pub struct LocalAction {
    pub service: String,
    pub name: String,
    pub handler: ActionHandler,
    pub timeout: Option<Duration>,
}

/// Locally hosted event handler
#[derive(Clone)]
pub struct LocalEventHandler {
    pub service: String,
    pub pattern: String,
    pub handler: EventHandler,
}

#[derive(Default)]
struct RegistryState {
    services: Vec<Arc<ServiceDefinition>>,
    actions: HashMap<String, LocalAction>,
    events: PathTrie<LocalEventHandler>,
    /// Distinct patterns, in first-registration order
    subscriptions: Vec<String>,
}

/// Services hosted by this node
pub struct ServiceRegistry {
    state: RwLock<RegistryState>,
    logger: Logger,
}

impl ServiceRegistry {
    pub fn new(logger: Logger) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            logger,
        }
    }

    /// Add a service and index its handlers
    ///
    /// Rejects a duplicate service name, an action name already hosted here,
    /// a pattern declared twice by the same service, and malformed names.
    pub async fn register(&self, service: ServiceDefinition) -> Result<Arc<ServiceDefinition>, BrokerError> {
        if service.name.is_empty() || service.name.contains('*') {
            return Err(BrokerError::InvalidName(service.name));
        }

        let mut state = self.state.write().await;

        if state.services.iter().any(|s| s.name == service.name) {
            return Err(BrokerError::DuplicateRegistration(format!(
                "service '{}'",
                service.name
            )));
        }

        // Validate everything before touching the state
        let mut action_names = Vec::with_capacity(service.actions.len());
        for action in &service.actions {
            let full_name = format!("{}.{}", service.name, action.name);
            validate_action_name(&full_name)?;
            if state.actions.contains_key(&full_name) || action_names.contains(&full_name) {
                return Err(BrokerError::DuplicateRegistration(format!(
                    "action '{}'",
                    full_name
                )));
            }
            action_names.push(full_name);
        }

        let mut patterns: Vec<&str> = Vec::with_capacity(service.events.len());
        for event in &service.events {
            validate_event_pattern(&event.pattern)?;
            if patterns.contains(&event.pattern.as_str()) {
                return Err(BrokerError::DuplicateRegistration(format!(
                    "event '{}' in service '{}'",
                    event.pattern, service.name
                )));
            }
            patterns.push(&event.pattern);
        }

        for (action, full_name) in service.actions.iter().zip(action_names) {
            state.actions.insert(
                full_name,
                LocalAction {
                    service: service.name.clone(),
                    name: action.name.clone(),
                    handler: Arc::clone(&action.handler),
                    timeout: action.timeout,
                },
            );
        }

        for event in &service.events {
            state.events.add_handler(
                &event.pattern,
                LocalEventHandler {
                    service: service.name.clone(),
                    pattern: event.pattern.clone(),
                    handler: Arc::clone(&event.handler),
                },
            );
            if !state.subscriptions.contains(&event.pattern) {
                state.subscriptions.push(event.pattern.clone());
            }
        }

        let service = Arc::new(service);
        state.services.push(Arc::clone(&service));
        self.logger.info(format!(
            "Registered service '{}' v{} ({} actions, {} events)",
            service.name,
            service.version,
            service.actions.len(),
            service.events.len()
        ));
        Ok(service)
    }

    pub async fn action(&self, name: &str) -> Option<LocalAction> {
        self.state.read().await.actions.get(name).cloned()
    }

    /// Local handlers whose pattern matches the event name
    pub async fn event_handlers(&self, event: &str) -> Vec<LocalEventHandler> {
        self.state.read().await.events.find_matches(event)
    }

    /// Services in registration order
    pub async fn services(&self) -> Vec<Arc<ServiceDefinition>> {
        self.state.read().await.services.clone()
    }

    /// Actions to advertise, sorted by name
    pub async fn advertised_actions(&self) -> Vec<(String, Option<Duration>)> {
        let state = self.state.read().await;
        let mut actions: Vec<(String, Option<Duration>)> = state
            .actions
            .iter()
            .map(|(name, action)| (name.clone(), action.timeout))
            .collect();
        actions.sort_by(|a, b| a.0.cmp(&b.0));
        actions
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.state.read().await.subscriptions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::logging::Component;
    use serde_json::json;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Logger::new_root(Component::Service, "test"))
    }

    fn math() -> ServiceDefinition {
        ServiceDefinition::new("math")
            .action("add", |_ctx| async { Ok(json!(0)) })
            .action_with_timeout("slow", Duration::from_millis(50), |_ctx| async {
                Ok(json!(0))
            })
            .event("math.*", |_ctx| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_register_indexes_actions_and_events() {
        let registry = registry();
        registry.register(math()).await.unwrap();

        assert!(registry.action("math.add").await.is_some());
        assert_eq!(
            registry.advertised_actions().await,
            vec![
                ("math.add".to_string(), None),
                ("math.slow".to_string(), Some(Duration::from_millis(50))),
            ]
        );
        assert_eq!(registry.event_handlers("math.done").await.len(), 1);
        assert_eq!(registry.subscriptions().await, vec!["math.*".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicates_are_rejected_without_partial_registration() {
        let registry = registry();
        registry.register(math()).await.unwrap();

        let err = registry.register(math()).await.unwrap_err();
        assert_eq!(err.kind(), "DuplicateRegistration");

        let twice = ServiceDefinition::new("calc")
            .action("mul", |_ctx| async { Ok(json!(0)) })
            .action("mul", |_ctx| async { Ok(json!(0)) });
        assert!(registry.register(twice).await.is_err());
        assert!(registry.action("calc.mul").await.is_none());

        let bad_pattern = ServiceDefinition::new("audit")
            .action("log", |_ctx| async { Ok(json!(0)) })
            .event("a.**.b", |_ctx| async { Ok(()) });
        let err = registry.register(bad_pattern).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidName");
        assert!(registry.action("audit.log").await.is_none());
        assert_eq!(registry.services().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_pattern_in_two_services_is_allowed() {
        let registry = registry();
        registry
            .register(ServiceDefinition::new("a").event("x.*", |_ctx| async { Ok(()) }))
            .await
            .unwrap();
        registry
            .register(ServiceDefinition::new("b").event("x.*", |_ctx| async { Ok(()) }))
            .await
            .unwrap();

        assert_eq!(registry.event_handlers("x.y").await.len(), 2);
        assert_eq!(registry.subscriptions().await, vec!["x.*".to_string()]);
    }
}
