// Utility Module

pub mod logging;

pub use logging::{Component, Logger};
