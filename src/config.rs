/// Engine configuration
///
/// Resolution order for the config file:
/// 1. Command-line argument (highest priority)
/// 2. `PHOTO_TRIAGE_CONFIG` environment variable
/// 3. `<config dir>/photo-triage/config.toml`
/// 4. Compiled defaults
///
/// A missing file falls through to the next step. A file that exists but
/// does not parse is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "PHOTO_TRIAGE_CONFIG";

const APP_DIR: &str = "photo-triage";

/// Top-level configuration for the review engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where decisions are persisted
    pub state_file: PathBuf,
    /// Prefetch cache windows and timeouts
    pub cache: CacheConfig,
}

/// Window sizes are counted in items of the visible sequence
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Full-resolution items kept behind the current one
    pub full_behind: usize,
    /// Full-resolution items kept ahead of the current one
    pub full_ahead: usize,
    /// Previews kept behind the current item
    pub preview_behind: usize,
    /// Previews kept ahead of the current item
    pub preview_ahead: usize,
    /// Items ahead of the current one fetched speculatively
    pub prefetch_ahead: usize,
    /// Preview box size in pixels
    pub preview_size: u32,
    /// How long the current item may take to load before it counts as failed
    pub fetch_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            full_behind: 5,
            full_ahead: 10,
            preview_behind: 100,
            preview_ahead: 100,
            prefetch_ahead: 3,
            preview_size: 384,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch_ahead > self.full_ahead {
            return Err(Error::Config(format!(
                "prefetch_ahead ({}) must not exceed full_ahead ({})",
                self.prefetch_ahead, self.full_ahead
            )));
        }
        if self.preview_size == 0 {
            return Err(Error::Config("preview_size must be > 0".to_string()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(Error::Config("fetch_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Load from an explicit file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve and load the config following the priority order above
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = default_config_file().filter(|p| p.exists()) {
            return Self::from_file(&path);
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }
}

/// `<config dir>/photo-triage/config.toml`
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Get the path where decisions should be stored
/// - Linux: ~/.local/share/photo-triage/decisions.json
/// - macOS: ~/Library/Application Support/photo-triage/decisions.json
/// - Windows: %APPDATA%\photo-triage\decisions.json
fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("decisions.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_window_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.full_behind, 5);
        assert_eq!(config.cache.full_ahead, 10);
        assert_eq!(config.cache.preview_behind, 100);
        assert_eq!(config.cache.preview_ahead, 100);
        assert_eq!(config.cache.prefetch_ahead, 3);
        assert!(config.state_file.ends_with("photo-triage/decisions.json"));
        config.cache.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            state_file = "/tmp/triage.json"

            [cache]
            full_ahead = 20
            fetch_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.state_file, PathBuf::from("/tmp/triage.json"));
        assert_eq!(config.cache.full_ahead, 20);
        assert_eq!(config.cache.full_behind, 5);
        assert_eq!(config.cache.fetch_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = EngineConfig::from_toml("[cache]\nprefetch_ahead = 4\nfull_ahead = 2\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = EngineConfig::from_toml("cache = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\npreview_size = 128\n").unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cache.preview_size, 128);
    }
}
