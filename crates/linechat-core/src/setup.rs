//! Config loading and default paths.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::ChatError;

/// Load configuration from the given path, or the default location.
///
/// A missing file is not an error; defaults are used instead.
pub fn load_config(path: Option<&Path>) -> Result<Config, ChatError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ChatError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ChatError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!(path = %config_path.display(), "no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("linechat")
}

/// Get the default config file path.
fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
