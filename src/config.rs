use serde::{Deserialize, Serialize};

use crate::constants::MAX_REG_CNT;

const DEFAULT_CONFIG_PATH: &str = "/etc/xfer-desc/config.toml";

/// Errors raised while loading an agent configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the file failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is not valid TOML for `AgentConfig`
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Agent configuration. Missing fields fall back to their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Pin host pages with `mlock` when registering `DRAM` memory.
    pub pin_dram: bool,
    /// Maximum number of live registrations, capped at `MAX_REG_CNT`.
    pub max_registrations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pin_dram: false,
            max_registrations: MAX_REG_CNT,
        }
    }
}

impl AgentConfig {
    pub(crate) fn pin_dram(&self) -> bool {
        self.pin_dram
    }

    pub(crate) fn max_registrations(&self) -> usize {
        self.max_registrations
    }
}

/// Loads `AgentConfig` from TOML files.
#[derive(Debug, Clone, Copy)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration from the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_default() -> Result<AgentConfig, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads the configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_path(path: &str) -> Result<AgentConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub(crate) fn parse(content: &str) -> Result<AgentConfig, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        Ok(config)
    }
}
