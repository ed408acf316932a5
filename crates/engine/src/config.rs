// Local configuration for the StoryVerse engine.
//
// Global config: `~/.storyverse/config.toml`
// Meta store:    `<data_dir>/meta.db` (data_dir defaults to `~/.storyverse/`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use storyverse_common::format::DEFAULT_PROJECT_FILE_NAME;

use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};

/// Default quiet period before a dirty document is saved.
const DEFAULT_DEBOUNCE_MS: u64 = 1000;
/// Minimum allowed debounce window.
const MIN_DEBOUNCE_MS: u64 = 100;
/// Maximum allowed debounce window.
const MAX_DEBOUNCE_MS: u64 = 10_000;
/// How long the cosmetic `saved` status lingers before reverting to `idle`.
const DEFAULT_SAVED_DISPLAY_MS: u64 = 500;
/// Polling interval while `flush` waits for an in-flight save.
const DEFAULT_FLUSH_POLL_MS: u64 = 100;

const META_DB_NAME: &str = "meta.db";

/// Root directory for StoryVerse global state: `~/.storyverse/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".storyverse"))
}

/// Path to the global config file: `~/.storyverse/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Engine config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct EngineConfig {
    /// Directory holding `meta.db`. Falls back to `~/.storyverse/`.
    pub data_dir: Option<PathBuf>,
    /// Debounce and flush timing.
    pub save: SaveConfig,
    /// Remote drive endpoints.
    pub drive: DriveConfig,
}

impl EngineConfig {
    /// Load from `~/.storyverse/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            ensure_owner_only_dir(parent)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io).and_then(|_| {
            ensure_owner_only_file(path)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))
        })
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(global_dir)
    }

    /// Resolved path of the key-value meta store.
    pub fn meta_db_path(&self) -> Option<PathBuf> {
        self.data_dir().map(|dir| dir.join(META_DB_NAME))
    }
}

/// Save pipeline timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SaveConfig {
    pub debounce_ms: u64,
    pub saved_display_ms: u64,
    pub flush_poll_ms: u64,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            saved_display_ms: DEFAULT_SAVED_DISPLAY_MS,
            flush_poll_ms: DEFAULT_FLUSH_POLL_MS,
        }
    }
}

impl SaveConfig {
    /// Debounce window, clamped to [100ms, 10s].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS))
    }

    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }

    /// Never zero, so `flush` cannot spin.
    pub fn flush_poll_interval(&self) -> Duration {
        Duration::from_millis(self.flush_poll_ms.max(1))
    }
}

/// Remote drive and OAuth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriveConfig {
    /// Drive v3 metadata API base.
    pub api_base: String,
    /// Drive v3 media upload base.
    pub upload_base: String,
    /// Well-known project file name used for discovery.
    pub file_name: String,
    pub token_url: String,
    pub revoke_url: String,
    /// OAuth client id used when refreshing tokens.
    pub client_id: Option<String>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".into(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".into(),
            file_name: DEFAULT_PROJECT_FILE_NAME.into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            revoke_url: "https://oauth2.googleapis.com/revoke".into(),
            client_id: None,
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
