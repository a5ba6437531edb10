//! Configuration module for paych-server.
//!
//! Handles loading configuration from TOML files and CLI arguments (which
//! clap may in turn fill from environment variables).

pub mod file;
pub mod runtime;

use crate::config::file::{FileConfig, RawConfig};
use crate::config::runtime::{RuntimeConfig, runtime_config};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Streaming transport address; fixed until restart.
    pub listen: SocketAddr,
    /// Raw transport settings; fixed until restart.
    pub raw: RawConfig,
    /// Values that follow `SIGHUP` reloads.
    pub runtime: RuntimeConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
    raw_listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(
        config_path: impl AsRef<Path>,
        listen_override: Option<SocketAddr>,
        raw_listen_override: Option<SocketAddr>,
    ) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
            raw_listen_override,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file (a missing file means all defaults)
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let mut file_config = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.config_path.display(),
                    "Config file not found, using defaults"
                );
                FileConfig::default()
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        if let Some(listen) = self.raw_listen_override {
            file_config.raw.listen = listen;
        }

        validate(&file_config)?;

        Ok(LoadedConfig {
            listen: file_config.server.listen,
            runtime: runtime_config(&file_config),
            raw: file_config.raw,
        })
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.raw.publish_queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "raw.publish_queue_capacity must be greater than zero".to_owned(),
        ));
    }
    if config.subscriptions.notification_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "subscriptions.notification_buffer must be greater than zero".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "paych-config-{}-{name}.toml",
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn cli_overrides_win_over_the_file() {
        let path = write_config(
            "overrides",
            "[server]\nlisten = \"127.0.0.1:1000\"\n[raw]\nlisten = \"127.0.0.1:1001\"\n",
        );
        let cli: SocketAddr = "127.0.0.1:2000".parse().unwrap();
        let loaded = ConfigLoader::new(&path, Some(cli), None).load().unwrap();
        assert_eq!(loaded.listen, cli);
        assert_eq!(loaded.raw.listen.port(), 1001);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("paych-config-does-not-exist.toml");
        let loaded = ConfigLoader::new(&path, None, None).load().unwrap();
        assert_eq!(loaded.runtime, RuntimeConfig::default());
        assert_eq!(loaded.listen.port(), 50051);
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let path = write_config("zero", "[raw]\npublish_queue_capacity = 0\n");
        let err = ConfigLoader::new(&path, None, None).load().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        std::fs::remove_file(path).unwrap();

        let path = write_config("zero-buffer", "[subscriptions]\nnotification_buffer = 0\n");
        let err = ConfigLoader::new(&path, None, None).load().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn reload_picks_up_runtime_changes() {
        let path = write_config("reload", "[subscriptions]\nnotification_buffer = 8\n");
        let loader = ConfigLoader::new(&path, None, None);
        assert_eq!(loader.load().unwrap().runtime.notification_buffer, 8);

        std::fs::write(&path, "[subscriptions]\nnotification_buffer = 16\n").unwrap();
        assert_eq!(loader.reload().unwrap().runtime.notification_buffer, 16);
        std::fs::remove_file(path).unwrap();
    }
}
