//! Configuration schema for Stratum
//!
//! Configuration is stored at `~/.config/stratum/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// State composition settings
    pub compose: ComposeConfig,

    /// Build graph defaults
    pub build: BuildConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// State composition settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Compose states with whole-tree copies instead of diff/merge.
    ///
    /// Set this for execution backends that cannot apply diff or merge ops.
    pub disable_diff_merge: bool,
}

/// Build graph defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Prefix for auto-namespaced cache keys
    pub namespace: String,

    /// Target platform, e.g. "linux/amd64". Unset means the host platform.
    pub platform: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            namespace: "stratum".to_string(),
            platform: None,
        }
    }
}
