// Logging Configuration
//
// This module provides configuration options for logging in the mesh node.

use crate::util::logging::Component;
use std::collections::HashMap;
use std::io::Write;

/// Logging configuration options
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default log level for all components
    pub default_level: LogLevel,
    /// Component-specific log levels
    pub component_levels: HashMap<Component, LogLevel>,
}

/// Log levels matching standard Rust log crate levels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

impl LogLevel {
    /// Convert to log::LevelFilter
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Off => log::LevelFilter::Off,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingConfig {
    /// Create a new logging configuration with default settings
    pub fn new() -> Self {
        Self {
            default_level: LogLevel::Info,
            component_levels: HashMap::new(),
        }
    }

    /// Create a default logging configuration with Info level for all components
    pub fn default_info() -> Self {
        Self::new()
    }

    /// Set the default log level
    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    /// Set a log level for a specific component
    pub fn with_component_level(mut self, component: Component, level: LogLevel) -> Self {
        self.component_levels.insert(component, level);
        self
    }

    /// Apply this logging configuration
    ///
    /// INTENTION: Configure the global logger from the settings in this
    /// LoggingConfig object. `RUST_LOG` directives, when present, are layered
    /// on top so a developer can still raise verbosity ad hoc.
    ///
    /// Note: If the logger is already initialized, this method will silently return
    /// without doing anything to avoid panics in test environments where multiple
    /// tests might try to initialize the logger.
    pub fn apply(&self) {
        let mut builder = env_logger::Builder::new();

        builder.filter_level(self.default_level.to_level_filter());

        for (component, level) in &self.component_levels {
            builder.filter(Some(component.target()), level.to_level_filter());
        }

        builder.parse_default_env();

        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });

        let _ = builder.try_init();
    }
}
