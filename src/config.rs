use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pkgmgr::BackendKind;
use crate::privilege::Helper;

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "SETUPR_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Force a backend instead of detecting it from os-release
    #[serde(default)]
    pub backend: Option<BackendKind>,

    /// Privilege helper used for package mutations
    #[serde(default)]
    pub escalation: Helper,

    /// Kill privileged operations running longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// tracing filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: None,
            escalation: Helper::default(),
            timeout_secs: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config")
    }

    /// Load the config file, or defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self> {
        match default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

/// `$SETUPR_CONFIG`, else `$XDG_CONFIG_HOME/setupr/config.toml`, else
/// `~/.config/setupr/config.toml`
pub fn default_path() -> Option<PathBuf> {
    let var = |name: &str| env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);

    if let Some(path) = var(CONFIG_ENV) {
        return Some(path);
    }
    let base = var("XDG_CONFIG_HOME").or_else(|| var("HOME").map(|home| home.join(".config")))?;
    Some(base.join("setupr").join("config.toml"))
}
