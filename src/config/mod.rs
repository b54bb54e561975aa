// Configuration Module
//
// This module provides configuration options shared by the node, the
// dispatcher and the transport adapters.

pub mod logging_config;

// Re-export configuration types
pub use logging_config::*;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a retried call picks its next node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrySelection {
    /// Skip nodes that already timed out for this call, unless no other
    /// candidate is left
    AvoidFailed,
    /// Let the load balancer choose among all candidates again
    Any,
}

/// Retry behaviour applied by the dispatcher when a call times out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Extra attempts after the first one
    pub retries: u32,
    pub reselection: RetrySelection,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            retries: 2,
            reselection: RetrySelection::AvoidFailed,
        }
    }
}

impl RetryPolicy {
    /// Retry policy that is switched on with the given number of retries
    pub fn enabled(retries: u32) -> Self {
        Self {
            enabled: true,
            retries,
            ..Self::default()
        }
    }

    pub fn with_reselection(mut self, reselection: RetrySelection) -> Self {
        self.reselection = reselection;
        self
    }

    /// Number of retries actually granted to a call
    pub fn effective_retries(&self) -> u32 {
        if self.enabled {
            self.retries
        } else {
            0
        }
    }
}

/// Reconnect strategy used by transport adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Total connection attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff to wait after the given failed attempt (1-based), doubling
    /// each time and capped at `max_backoff_ms`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}
