//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Database file name inside the data directory.
pub const DATABASE_NAME: &str = "mmssms.db";

/// `err_type` at or above which a pending message counts as permanently failed.
pub const DEFAULT_FAILURE_THRESHOLD: i32 = 10;

/// Runtime options for a [`crate::MessageStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Full path of the SQLite database file
    pub db_path: PathBuf,
    /// Use strict (full national number) phone comparison instead of the
    /// loose trailing-digits rule
    pub strict_phone_compare: bool,
    /// Pending `err_type` cutoff for the permanent failure state
    pub permanent_failure_threshold: i32,
    /// How long a writer waits on another connection's lock
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = default_data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            db_path: data_dir.join(DATABASE_NAME),
            strict_phone_compare: false,
            permanent_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Config rooted at a specific data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: data_dir.into().join(DATABASE_NAME),
            ..Self::default()
        }
    }
}

/// Platform data directory for the store, e.g. `~/.local/share/mmssms`.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("mmssms"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_data_dir_places_database_file() {
        let config = StoreConfig::with_data_dir("/tmp/somewhere");
        assert_eq!(config.db_path, PathBuf::from("/tmp/somewhere/mmssms.db"));
        assert_eq!(config.permanent_failure_threshold, 10);
        assert!(!config.strict_phone_compare);
    }
}
