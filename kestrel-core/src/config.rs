//! Environment configuration.
//!
//! Selects the debug tool, the target and the debug server endpoint. Loaded
//! from a JSON file or built in code; every field has a default except the
//! tool and target names.

use crate::error::ConfigError;
use crate::target::PhysicalInterface;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 1442;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugToolConfig {
    pub name: String,

    /// Release the tool between debug sessions so other software can use it.
    #[serde(default = "default_true")]
    pub release_post_debug_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    #[serde(default)]
    pub physical_interface: Option<PhysicalInterface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Complete configuration for one debugging environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub tool: DebugToolConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

const fn default_true() -> bool {
    true
}

fn default_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

impl EnvironmentConfig {
    pub fn new(tool_name: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            tool: DebugToolConfig {
                name: tool_name.into(),
                release_post_debug_session: true,
            },
            target: TargetConfig {
                name: target_name.into(),
                physical_interface: None,
            },
            server: ServerConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }
}
