//! Engine configuration schema

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Tunables for the execution runtime and its reference dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of recycled `AppletResult` bodies kept for reuse
    #[serde(default = "default_result_pool_capacity")]
    pub result_pool_capacity: usize,

    /// Number of recycled `TaskRuntime` frames kept for reuse
    #[serde(default = "default_runtime_pool_capacity")]
    pub runtime_pool_capacity: usize,

    /// Default tracing level (`trace`, `debug`, `info`, `warn`, `error`)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound of suspended runtimes the dispatcher retains
    #[serde(default = "default_max_parked_runtimes")]
    pub max_parked_runtimes: usize,
}

fn default_result_pool_capacity() -> usize {
    20
}

fn default_runtime_pool_capacity() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_parked_runtimes() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            result_pool_capacity: default_result_pool_capacity(),
            runtime_pool_capacity: default_runtime_pool_capacity(),
            log_level: default_log_level(),
            max_parked_runtimes: default_max_parked_runtimes(),
        }
    }
}

impl EngineConfig {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        let capacities = [
            ("result_pool_capacity", self.result_pool_capacity),
            ("runtime_pool_capacity", self.runtime_pool_capacity),
            ("max_parked_runtimes", self.max_parked_runtimes),
        ];
        for (key, value) in capacities {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::InvalidValue {
                key: "log_level".to_string(),
                reason: format!("unknown level '{}'", other),
            }),
        }
    }
}
