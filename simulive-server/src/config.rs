//! Server configuration
//!
//! Loaded from a TOML file (path in `SIMULIVE_CONFIG`) and then overridden by
//! environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the TOML config file
pub const CONFIG_PATH_VAR: &str = "SIMULIVE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Bearer token for admin endpoints. Admin mutations are refused when unset.
    #[serde(default)]
    pub admin_token: Option<String>,

    /// JSON file of stream records to seed the store with
    #[serde(default)]
    pub streams_file: Option<PathBuf>,

    /// JSON file of video assets
    #[serde(default)]
    pub assets_file: Option<PathBuf>,

    /// Lifetime of issued playback tokens
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_token_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            admin_token: None,
            streams_file: None,
            assets_file: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// File named by `SIMULIVE_CONFIG` (if any), then environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Some(token) = lookup("ADMIN_TOKEN") {
            let token = token.trim().to_string();
            self.admin_token = (!token.is_empty()).then_some(token);
        }
        if let Some(path) = lookup("STREAMS_FILE") {
            self.streams_file = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("ASSETS_FILE") {
            self.assets_file = Some(PathBuf::from(path));
        }
        if let Some(ttl) = lookup("TOKEN_TTL_SECS") {
            if let Ok(t) = ttl.trim().parse() {
                self.token_ttl_secs = t;
            }
        }
        self
    }
}
