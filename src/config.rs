//! Configuration file parser for ~/.config/feedloom/config.toml.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::feed::WalkLimits;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Engine configuration. Any subset of keys may be given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding the document store. Defaults to
    /// `feedloom.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Hard timeout for one feed fetch (request plus body), in seconds.
    pub fetch_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Items gathered per walk before it stops.
    pub content_quota: usize,

    /// Items requested from each source in a walk.
    pub per_source_limit: usize,

    /// Allow fetching from loopback and private-network hosts.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            fetch_timeout_secs: 3,
            max_feed_bytes: 10 * 1024 * 1024,
            content_quota: 15,
            per_source_limit: 5,
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "database_path",
        "fetch_timeout_secs",
        "max_feed_bytes",
        "content_quota",
        "per_source_limit",
        "allow_private_hosts",
    ];

    /// `~/.config/feedloom`, or `None` without a home directory.
    pub fn default_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("feedloom"))
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing, empty or whitespace-only file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line information
    /// - Zero timeout or per-source limit → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            timeout_secs = config.fetch_timeout_secs,
            quota = config.content_quota,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be at least 1".into()));
        }
        if self.per_source_limit == 0 {
            return Err(ConfigError::Invalid("per_source_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn walk_limits(&self) -> WalkLimits {
        WalkLimits {
            content_quota: self.content_quota,
            per_source_limit: self.per_source_limit,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Write `content` to a fresh temp dir and load it.
    fn load_str(name: &str, content: &str) -> Result<Config, ConfigError> {
        let dir = std::env::temp_dir().join(format!("feedloom_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        let result = Config::load(&path);
        std::fs::remove_dir_all(&dir).ok();
        result
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch_timeout_secs, 3);
        assert_eq!(config.max_feed_bytes, 10 * 1024 * 1024);
        assert_eq!(
            config.walk_limits(),
            WalkLimits {
                content_quota: 15,
                per_source_limit: 5
            }
        );
        assert!(!config.allow_private_hosts);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedloom_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_empty_and_whitespace_files_return_default() {
        assert_eq!(load_str("empty", "").unwrap(), Config::default());
        assert_eq!(load_str("whitespace", "   \n  \n").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = load_str("partial", "content_quota = 30\n").unwrap();
        assert_eq!(config.content_quota, 30);
        assert_eq!(config.per_source_limit, 5);
        assert_eq!(config.fetch_timeout_secs, 3);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedloom/store.db"
fetch_timeout_secs = 10
max_feed_bytes = 2048
content_quota = 40
per_source_limit = 10
allow_private_hosts = true
"#;
        let config = load_str("full", content).unwrap();
        assert_eq!(
            config,
            Config {
                database_path: Some(PathBuf::from("/var/lib/feedloom/store.db")),
                fetch_timeout_secs: 10,
                max_feed_bytes: 2048,
                content_quota: 40,
                per_source_limit: 10,
                allow_private_hosts: true,
            }
        );
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = load_str("invalid", "this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = load_str("unknown", "content_quota = 20\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.content_quota, 20);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(load_str("wrongtype", "content_quota = \"lots\"\n").is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(matches!(
            load_str("zero_timeout", "fetch_timeout_secs = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            load_str("zero_per_source", "per_source_limit = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let err = load_str("too_large", &"a".repeat(1_048_577)).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }
}
