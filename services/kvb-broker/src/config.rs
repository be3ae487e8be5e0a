//! Broker configuration, read from environment variables with a plain
//! `env::var(..).unwrap_or_else(..)` style rather than introducing a
//! config-file crate this workspace has no other use for.

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8081);
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        Self { port, data_dir }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            data_dir: PathBuf::from("./data"),
        }
    }
}
