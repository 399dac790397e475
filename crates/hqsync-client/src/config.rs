//! Client configuration.
//!
//! Loaded from a RON file; every field has a default so a partial file (or
//! no file at all) is valid:
//!
//! ```ron
//! (
//!     max_snapshot_bytes: 1000000,
//!     save_debounce_ms: 250,
//!     max_live_sessions: 8,
//!     local_db: Some("/var/lib/hqsync/replicas.sqlite"),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    APP_DIR, DEFAULT_COLLECTION_ROOT, DEFAULT_MAX_LIVE_SESSIONS, DEFAULT_MAX_MONTH_SNAPSHOT_BYTES,
    DEFAULT_MAX_SNAPSHOT_BYTES, DEFAULT_SAVE_DEBOUNCE, LOCAL_DB_FILE,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Top-level collection in the durable store.
    pub collection_root: String,

    /// Size ceiling for HQ snapshot writes.
    pub max_snapshot_bytes: usize,

    /// Size ceiling for the best-effort month summary snapshot.
    pub max_month_snapshot_bytes: usize,

    /// Debounce for coalesced saves, in milliseconds.
    pub save_debounce_ms: u64,

    /// Maximum live sessions per month; further resident scopes are
    /// backfilled read-only through the hierarchical loader.
    pub max_live_sessions: usize,

    /// Local replica database. `None` = platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_db: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection_root: DEFAULT_COLLECTION_ROOT.to_string(),
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
            max_month_snapshot_bytes: DEFAULT_MAX_MONTH_SNAPSHOT_BYTES,
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE.as_millis() as u64,
            max_live_sessions: DEFAULT_MAX_LIVE_SESSIONS,
            local_db: None,
        }
    }
}

impl SyncConfig {
    /// Parse a RON config string.
    pub fn from_ron(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: SyncConfig = ron::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a RON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text, path)
    }

    /// Load from `path` if it exists, else defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_root.is_empty() || self.collection_root.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "collection_root {:?} must be a single path segment",
                self.collection_root
            )));
        }
        if self.max_snapshot_bytes == 0 {
            return Err(ConfigError::Invalid("max_snapshot_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// Default config file location (`<config dir>/hqsync/config.ron`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.ron")
    }

    /// Resolved local replica database path.
    pub fn local_db_path(&self) -> PathBuf {
        self.local_db.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join(LOCAL_DB_FILE)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = SyncConfig::from_ron("(max_live_sessions: 2)", Path::new("test.ron")).unwrap();
        assert_eq!(config.max_live_sessions, 2);
        assert_eq!(config.max_snapshot_bytes, DEFAULT_MAX_SNAPSHOT_BYTES);
        assert_eq!(config.collection_root, "Primary");
        assert_eq!(config.save_debounce(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_root_rejected() {
        let err = SyncConfig::from_ron(r#"(collection_root: "a/b")"#, Path::new("t.ron")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error_reports_path() {
        let err = SyncConfig::from_ron("(max_live_sessions: ", Path::new("broken.ron")).unwrap_err();
        assert!(err.to_string().contains("broken.ron"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_or_default(&dir.path().join("nope.ron")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(&path, "(max_snapshot_bytes: 10, local_db: Some(\"/tmp/replicas.sqlite\"))").unwrap();
        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.max_snapshot_bytes, 10);
        assert_eq!(config.local_db_path(), PathBuf::from("/tmp/replicas.sqlite"));
    }
}
