//! Optional defaults file.
//!
//! Reads trace defaults from ~/.config/pathprobe/config.toml. Command-line
//! flags always win over values found here.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Trace defaults loaded from disk
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    /// Probe interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    /// Probe timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookahead: Option<u8>,
    /// Reverse DNS on/off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<bool>,
}

impl Defaults {
    /// Get config file path: ~/.config/pathprobe/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pathprobe").join("config.toml"))
    }

    /// Load defaults from the standard location (returns default if missing/invalid)
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load defaults from an explicit path. Unlike `load`, errors are reported.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
