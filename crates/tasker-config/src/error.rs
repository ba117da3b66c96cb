//! Failures surfaced while reading engine settings

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read engine config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or does not match `EngineConfig`
    #[error("malformed engine config {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("tag '{tag}' is not understood by the engine config loader")]
    UnknownTag { tag: String },

    /// `!env_var` named a variable that is unset and carries no fallback
    #[error("environment variable '{var}' is unset and has no fallback")]
    UnsetEnvVar { var: String },

    #[error("setting '{key}' rejected: {reason}")]
    InvalidValue { key: String, reason: String },
}
