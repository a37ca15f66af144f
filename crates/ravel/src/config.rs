use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::agent::MAX_CONSECUTIVE_TOOL_CALL_NUM;
use crate::module::UpdateOptions;
use crate::providers::base::GenerationConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_consecutive_tool_calls")]
    pub max_consecutive_tool_calls: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_consecutive_tool_calls: default_max_consecutive_tool_calls(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub update: UpdateOptions,
}

impl Settings {
    /// Defaults overridden by `RAVEL_*` environment variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Defaults, then the TOML file at `path`, then `RAVEL_*` environment variables
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default(
                "agent.max_consecutive_tool_calls",
                default_max_consecutive_tool_calls() as u64,
            )?
            .set_default("update.mode", "train")?
            .set_default("update.recursive", true)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("RAVEL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            ConfigError::Other(err)
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_consecutive_tool_calls == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_consecutive_tool_calls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_consecutive_tool_calls() -> usize {
    MAX_CONSECUTIVE_TOOL_CALL_NUM
}
