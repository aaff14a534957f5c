//! devcontainer.json loading
//!
//! Only the fields the forwarder needs are read. The file is JSON with
//! comments; full-line `//` comments are stripped before parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Forwarding-related subset of a devcontainer.json
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevcontainerConfig {
    /// Display name of the dev container
    #[serde(default)]
    pub name: String,

    /// User to run forwarded commands as, overriding the container metadata
    #[serde(default)]
    pub remote_user: Option<String>,

    /// Ports to forward from the host into the container
    #[serde(default)]
    pub forward_ports: Vec<u16>,
}

impl DevcontainerConfig {
    /// Parse from the text of a devcontainer.json
    pub fn from_jsonc(contents: &str) -> Result<Self, ConfigError> {
        let json = strip_line_comments(contents);
        Ok(serde_json::from_str(&json)?)
    }

    /// The configured remote user, treating an empty string as unset
    pub fn remote_user_override(&self) -> Option<&str> {
        self.remote_user.as_deref().filter(|user| !user.is_empty())
    }
}

impl fmt::Display for DevcontainerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={}, remote user={}, forward ports={:?}",
            self.name,
            self.remote_user.as_deref().unwrap_or(""),
            self.forward_ports
        )
    }
}

/// Location of the devcontainer.json for a workspace
pub fn devcontainer_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".devcontainer").join("devcontainer.json")
}

/// Load the devcontainer.json at `path`
pub fn load_devcontainer_config(path: &Path) -> Result<DevcontainerConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    DevcontainerConfig::from_jsonc(&contents)
}

/// Drop lines whose first non-blank characters are `//`
fn strip_line_comments(contents: &str) -> String {
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}
