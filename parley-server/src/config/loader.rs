//! Configuration loader

use std::path::Path;

use parley_utils::{config_file, ParleyError, Result};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| ParleyError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| ParleyError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.server.intake_capacity == 0 {
            return Err(ParleyError::config("intake_capacity must be at least 1"));
        }

        // tokio's bounded channels reject a zero capacity
        if config.session.outbox_capacity == 0 {
            return Err(ParleyError::config("outbox_capacity must be at least 1"));
        }

        if config.session.idle_timeout_secs == 0 {
            return Err(ParleyError::config("idle_timeout_secs must be at least 1"));
        }

        if config.session.drain_timeout_secs == 0 {
            return Err(ParleyError::config("drain_timeout_secs must be at least 1"));
        }

        if config.session.max_line_length == 0 {
            return Err(ParleyError::config("max_line_length must be at least 1"));
        }

        if config.echo.enabled {
            if config.echo.read_timeout_secs == 0 {
                return Err(ParleyError::config("echo read_timeout_secs must be at least 1"));
            }

            if config.echo.port != 0 && config.echo.listen_addr() == config.server.listen_addr() {
                return Err(ParleyError::config(format!(
                    "echo endpoint and chat listener both configured on {}",
                    config.server.listen_addr()
                )));
            }
        }

        Ok(())
    }

    /// Load from `path` (or the default location) and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}
