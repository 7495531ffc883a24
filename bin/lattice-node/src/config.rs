//! Single JSON config file (spec §6.5 "no schema migrations... a
//! monotonic `version` counter", §6.6 "configuration is a single JSON
//! file"), mirroring the teacher's `rusk/src/bin/config.rs` shape: a
//! struct with `#[serde(default = "...")]` sub-fields, merged with CLI
//! overrides in [`Config::merge`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::args::Args;

fn default_db_path() -> PathBuf {
    PathBuf::from("./lattice-db")
}

fn default_gateway_url() -> String {
    "wss://gateway.invalid/ws".to_string()
}

fn default_client_listen_addr() -> String {
    "127.0.0.1:7076".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_action_queue_soft_limit() -> usize {
    lattice_types::constants::ACTION_QUEUE_SOFT_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_client_listen_addr")]
    pub client_listen_addr: String,

    #[serde(default = "default_action_queue_soft_limit")]
    pub action_queue_soft_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_filter: None,
            db_path: default_db_path(),
            gateway_url: default_gateway_url(),
            client_listen_addr: default_client_listen_addr(),
            action_queue_soft_limit: default_action_queue_soft_limit(),
        }
    }
}

/// Configuration error: a bad CLI/config combination. Maps to CLI exit
/// code 1 (spec §6.6 "configuration error (invalid gateway URL)").
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid gateway URL {0:?}")]
    InvalidGatewayUrl(String),
}

impl Config {
    pub fn load(args: &Args) -> Result<Config, ConfigError> {
        let mut config = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
                serde_json::from_str(&text)
                    .map_err(|source| ConfigError::Parse { path: path.clone(), source })?
            }
            None => Config::default(),
        };
        config.merge(args);
        config.validate()?;
        Ok(config)
    }

    fn merge(&mut self, args: &Args) {
        if let Some(level) = args.log_level {
            self.log_level = level.to_string();
        }
        if let Some(db_path) = &args.db_path {
            self.db_path = db_path.clone();
        }
        if let Some(url) = &args.gateway_url {
            self.gateway_url = url.clone();
        }
        if let Some(addr) = &args.client_listen_addr {
            self.client_listen_addr = addr.clone();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.gateway_url.starts_with("ws://") || self.gateway_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidGatewayUrl(self.gateway_url.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn non_websocket_url_is_rejected() {
        let mut config = Config::default();
        config.gateway_url = "http://example.com".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidGatewayUrl(_))));
    }
}
