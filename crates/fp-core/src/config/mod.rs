//! Configuration management for the port forwarder

mod devcontainer;
mod forwarder;
pub mod serde_utils;

pub use devcontainer::{devcontainer_config_path, load_devcontainer_config, DevcontainerConfig};
pub use forwarder::ForwarderConfig;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Per-user settings directory, `./devcontainer-forward-ports` when the
/// platform has none
pub fn default_config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("devcontainer-forward-ports")
}

/// `config.toml` inside [`default_config_dir`]
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Read and parse a TOML settings file.
///
/// A missing file is reported as [`ConfigError::NotFound`] so callers can
/// fall back to defaults.
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Ok(toml::from_str(&content)?)
}
