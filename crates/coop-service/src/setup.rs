//! Config loading and default paths.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::ServiceError;

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&str>) -> Result<Config, ServiceError> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        load_config_file(&config_path)
    } else if path.is_some() {
        Err(ServiceError::Config(format!(
            "config file not found: {}",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

fn load_config_file(path: &Path) -> Result<Config, ServiceError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ServiceError::Config(format!("failed to read config: {e}")))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| ServiceError::Config(format!("failed to parse config: {e}")))?;
    validate(&config)?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ServiceError> {
    if config.service.queue_depth == 0 {
        return Err(ServiceError::Config("service.queue_depth must be > 0".into()));
    }
    if config.remote_input.timeout_ms == 0 {
        return Err(ServiceError::Config("remote_input.timeout_ms must be > 0".into()));
    }
    if config.remote_input.notify_timeout_ms == 0 {
        return Err(ServiceError::Config(
            "remote_input.notify_timeout_ms must be > 0".into(),
        ));
    }
    Ok(())
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("input-coop")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
