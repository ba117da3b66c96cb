//! YAML configuration loading for the tasker engine
//!
//! The engine reads a single YAML document describing pool capacities,
//! logging and dispatcher limits. Values may be pulled from the environment
//! with a custom tag:
//!
//! - `!env_var NAME` - substitute the value of `NAME`
//! - `!env_var NAME default` - substitute `NAME`, or `default` when unset
//!
//! # Example
//!
//! ```ignore
//! use tasker_config::load_config;
//!
//! let config = load_config("/etc/tasker/engine.yaml")?;
//! println!("{}", config.runtime_pool_capacity);
//! ```

mod engine_config;
mod error;
mod loader;

pub use engine_config::EngineConfig;
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, YamlLoader};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
