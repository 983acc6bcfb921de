//! Client configuration.
//!
//! Loaded from `<config dir>/varasto/client.toml`, then overridden by the
//! `VARASTO_SERVER` / `VARASTO_TOKEN` environment variables. Missing file
//! means defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. `http://localhost:8066`.
    pub server_addr: String,
    /// Bearer token sent with every request.
    pub auth_token: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "http://localhost:8066".to_string(),
            auth_token: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("varasto/client.toml"))
    }

    pub fn load() -> Result<ClientConfig> {
        let mut config = ClientConfig::default();

        if let Some(path) = Self::config_path() {
            if path.exists() {
                debug!(path = %path.display(), "loading client config");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("VARASTO_SERVER") {
            self.server_addr = addr;
        }
        if let Ok(token) = std::env::var("VARASTO_TOKEN") {
            self.auth_token = token;
        }
    }
}
