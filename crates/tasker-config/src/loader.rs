//! Reads engine settings from YAML, expanding `!env_var` tags first

use crate::engine_config::EngineConfig;
use crate::error::{ConfigError, ConfigResult};
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const ENV_VAR_TAG: &str = "!env_var";

/// Turns raw YAML into a tag-free document
pub struct YamlLoader {
    origin: PathBuf,
}

impl YamlLoader {
    /// `origin` names the document in error messages
    pub fn new(origin: impl Into<PathBuf>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub fn load_file(path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = path.as_ref();
        debug!(?path, "reading engine config");
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(path).load_string(&text)
    }

    pub fn load_string(&self, text: &str) -> ConfigResult<Value> {
        let raw = serde_yaml::from_str(text).map_err(|source| self.malformed(source))?;
        self.expand(raw)
    }

    fn malformed(&self, source: serde_yaml::Error) -> ConfigError {
        ConfigError::Malformed {
            path: self.origin.clone(),
            source,
        }
    }

    fn expand(&self, node: Value) -> ConfigResult<Value> {
        Ok(match node {
            Value::Tagged(tagged) => self.expand_tag(*tagged)?,
            Value::Sequence(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(|item| self.expand(item))
                    .collect::<ConfigResult<_>>()?,
            ),
            Value::Mapping(entries) => {
                let mut expanded = Mapping::with_capacity(entries.len());
                for (key, value) in entries {
                    expanded.insert(self.expand(key)?, self.expand(value)?);
                }
                Value::Mapping(expanded)
            }
            scalar => scalar,
        })
    }

    fn expand_tag(&self, tagged: TaggedValue) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(%tag, "expanding tag");
        if tag != ENV_VAR_TAG {
            return Err(ConfigError::UnknownTag { tag });
        }
        let Value::String(body) = tagged.value else {
            return Err(ConfigError::InvalidValue {
                key: tag,
                reason: "expected `NAME` or `NAME fallback`".to_string(),
            });
        };
        substitute_env(&body)
    }
}

/// Resolves `NAME [fallback]`; the text is re-read as YAML so numbers stay numbers
fn substitute_env(body: &str) -> ConfigResult<Value> {
    let (name, fallback) = match body.trim().split_once(char::is_whitespace) {
        Some((name, rest)) => (name, Some(rest.trim())),
        None => (body.trim(), None),
    };

    let text = match std::env::var(name) {
        Ok(text) => text,
        Err(_) => match fallback {
            Some(fallback) => fallback.to_string(),
            None => {
                return Err(ConfigError::UnsetEnvVar {
                    var: name.to_string(),
                })
            }
        },
    };

    debug!(var = name, "substituted environment variable");
    Ok(serde_yaml::from_str(&text).unwrap_or(Value::String(text)))
}

/// Load an engine configuration file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<EngineConfig> {
    let path = path.as_ref();
    let document = YamlLoader::load_file(path)?;
    finish(&YamlLoader::new(path), document)
}

/// Load an engine configuration from YAML text
pub fn load_config_str(text: &str) -> ConfigResult<EngineConfig> {
    let loader = YamlLoader::new("<inline>");
    let document = loader.load_string(text)?;
    finish(&loader, document)
}

fn finish(loader: &YamlLoader, document: Value) -> ConfigResult<EngineConfig> {
    // empty document: all defaults
    let config = match document {
        Value::Null => EngineConfig::default(),
        document => serde_yaml::from_value(document).map_err(|e| loader.malformed(e))?,
    };
    config.validate()?;
    Ok(config)
}
