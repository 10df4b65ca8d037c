//! Engine configuration.

use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Engine-wide configuration, loaded from `config.toml` under the history
/// root when present.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Lock acquisition behaviour.
    #[serde(default)]
    pub locks: LockConfig,

    /// Log file handling.
    #[serde(default)]
    pub logs: LogConfig,
}

impl EngineConfig {
    /// Load configuration from the history root, falling back to defaults
    /// when no file exists.
    pub fn load(history_root: &Path) -> Result<Self> {
        let path = history_root.join("config.toml");
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| HistoryError::ConfigError(format!("failed to read config: {e}")))?;
            toml::from_str(&content)
                .map_err(|e| HistoryError::ConfigError(format!("failed to parse config: {e}")))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the history root.
    pub fn save(&self, history_root: &Path) -> Result<()> {
        let path = history_root.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| HistoryError::ConfigError(format!("failed to serialize config: {e}")))?;
        fs::write(&path, content)
            .map_err(|e| HistoryError::ConfigError(format!("failed to write config: {e}")))?;
        Ok(())
    }
}

/// Lock acquisition configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockConfig {
    /// Seconds to wait for a contended lock before failing (default: 10).
    pub timeout_secs: u64,

    /// Minimum age in seconds before a dead holder's lock may be reclaimed
    /// (default: 5).
    pub stale_min_age_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            stale_min_age_secs: 5,
        }
    }
}

impl LockConfig {
    /// Lock timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Stale reclamation debounce as a Duration.
    pub fn stale_min_age(&self) -> Duration {
        Duration::from_secs(self.stale_min_age_secs)
    }
}

/// Log file configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Warn when an in-place rewrite loads a log larger than this many
    /// bytes (default: 50 MB).
    pub warn_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            warn_bytes: 50 * 1024 * 1024,
        }
    }
}
