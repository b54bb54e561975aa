// Error Types
//
// INTENTION: Give callers of the node a closed set of failure kinds they can
// match on. Internal plumbing (transport, codec, lifecycle) keeps using
// anyhow; only the outward-facing call surface is typed.

use serde_json::Value;
use thiserror::Error;

/// Failure of a broker operation as seen by the caller
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// No alive node advertises the requested action
    #[error("Service '{action}' is not available")]
    ServiceUnavailable { action: String },

    /// Deadline elapsed with no reply and no retries left
    #[error("Request '{action}' timed out after {timeout_ms}ms (node '{node_id}')")]
    CallTimeout {
        action: String,
        node_id: String,
        timeout_ms: u64,
    },

    /// The handler on the remote node failed
    #[error("{message}")]
    RemoteActionError {
        action: String,
        node_id: String,
        kind: String,
        message: String,
        data: Option<Value>,
    },

    /// The transport could not connect or publish
    #[error("Transport connection error: {0}")]
    Connection(String),

    /// A service tried to register a name that is already taken on this node
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// The pending call was cancelled before a reply arrived
    #[error("Request '{action}' was cancelled")]
    Cancelled { action: String },

    /// Malformed action name or event pattern
    #[error("Invalid name '{0}'")]
    InvalidName(String),

    /// Operation not allowed in the node's current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl BrokerError {
    /// Stable string identifier of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::ServiceUnavailable { .. } => "ServiceUnavailable",
            BrokerError::CallTimeout { .. } => "CallTimeout",
            BrokerError::RemoteActionError { .. } => "RemoteActionError",
            BrokerError::Connection(_) => "ConnectionError",
            BrokerError::DuplicateRegistration(_) => "DuplicateRegistration",
            BrokerError::Cancelled { .. } => "Cancelled",
            BrokerError::InvalidName(_) => "InvalidName",
            BrokerError::InvalidState(_) => "InvalidState",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::CallTimeout { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, BrokerError::ServiceUnavailable { .. })
    }
}

/// Error raised by action handler code
///
/// INTENTION: Let a handler choose the kind and optional data that the
/// caller sees in its `RemoteActionError`. Handlers return it through
/// anyhow (`Err(ActionError::new("ValidationError", "...").into())`); any
/// other error type is reported with kind `"Error"`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActionError {
    pub kind: String,
    pub message: String,
    pub data: Option<Value>,
}

impl ActionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Extract kind/message/data from an arbitrary handler error
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<ActionError>() {
            Some(action_error) => action_error.clone(),
            None => match error.downcast_ref::<BrokerError>() {
                // A nested call failure keeps its original kind
                Some(BrokerError::RemoteActionError {
                    kind, message, data, ..
                }) => ActionError {
                    kind: kind.clone(),
                    message: message.clone(),
                    data: data.clone(),
                },
                Some(other) => ActionError::new(other.kind(), other.to_string()),
                None => ActionError::new("Error", error.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_action_error_is_recovered_from_anyhow() {
        let err: anyhow::Error = ActionError::new("ValidationError", "bad input").into();
        let extracted = ActionError::from_anyhow(&err);
        assert_eq!(extracted.kind, "ValidationError");
        assert_eq!(extracted.message, "bad input");
    }

    #[test]
    fn test_plain_error_gets_generic_kind() {
        let err = anyhow!("Division by zero");
        let extracted = ActionError::from_anyhow(&err);
        assert_eq!(extracted.kind, "Error");
        assert_eq!(extracted.message, "Division by zero");
    }

    #[test]
    fn test_remote_error_displays_remote_message() {
        let err = BrokerError::RemoteActionError {
            action: "math.divide".to_string(),
            node_id: "node-a".to_string(),
            kind: "Error".to_string(),
            message: "Division by zero".to_string(),
            data: None,
        };
        assert_eq!(err.to_string(), "Division by zero");
        assert_eq!(err.kind(), "RemoteActionError");
    }
}
