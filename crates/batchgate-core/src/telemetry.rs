//! Tracing / logging initialisation.
//!
//! `level` applies to the batchgate crates, `others` to everything else, so
//! turning the gate up to `debug` does not also turn up the runtime or the
//! model's own dependencies. Component overrides name a module of this crate
//! (`aggregator`, `gate`, ...) or a full tracing target.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ConfigError;

pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// Tracing targets owned by this project.
const OWN_TARGETS: &[&str] = &["batchgate_core", "batchgate_classify"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for the batchgate crates.
    #[serde(default = "default_level")]
    pub level: String,
    /// Level for every other target.
    #[serde(default = "default_others")]
    pub others: String,
    /// Per-component overrides: module or target → level.
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_others() -> String {
    "warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            others: default_others(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Read `LOG_LEVEL` and `LOG_FORMAT` (`text` | `json`) from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            let level = level.trim().to_lowercase();
            if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off") {
                return Err(ConfigError::Parse {
                    var: ENV_LOG_LEVEL,
                    value: level,
                });
            }
            config.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            config.json = match format.trim().to_lowercase().as_str() {
                "json" => true,
                "text" => false,
                _ => {
                    return Err(ConfigError::Parse {
                        var: ENV_LOG_FORMAT,
                        value: format,
                    })
                }
            };
        }
        Ok(config)
    }

    /// Build the `EnvFilter` directive string, e.g.
    /// `"warn,batchgate_core=info,batchgate_classify=info,batchgate_core::aggregator=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.others.clone();
        for target in OWN_TARGETS {
            directives.push_str(&format!(",{target}={}", self.level));
        }

        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={level}", component_target(component)));
        }
        directives
    }
}

fn component_target(component: &str) -> String {
    let component = component.replace('-', "_");
    if component.contains("::") || component.starts_with("batchgate_") {
        component
    } else {
        format!("batchgate_core::{component}")
    }
}

/// Install the global subscriber. Call once at startup.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    installed.is_ok()
}
