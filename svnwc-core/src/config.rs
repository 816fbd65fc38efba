//! Working-copy configuration
//!
//! Stored at `<wcroot>/.svn/wc-config.json`; a missing file means defaults.

use crate::error::{Result, WcError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "wc-config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WcConfig {
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Refuse to open a working copy whose work queue is not empty.
    #[serde(default = "default_true")]
    pub enforce_empty_work_queue: bool,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Stamp installed files with their last-changed date.
    #[serde(default)]
    pub use_commit_times: bool,
    /// Re-hash every pristine text during cleanup.
    #[serde(default)]
    pub validate_pristines_on_cleanup: bool,
}

/// How batch work (pristine validation) is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutorConfig {
    Pool {
        #[serde(default = "default_workers")]
        workers: usize,
    },
    Inline,
}

fn default_busy_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::Pool { workers: default_workers() }
    }
}

impl Default for WcConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            enforce_empty_work_queue: true,
            executor: ExecutorConfig::default(),
            use_commit_times: false,
            validate_pristines_on_cleanup: false,
        }
    }
}

impl WcConfig {
    /// Load config from an administrative directory.
    pub fn load(admin_dir: &Path) -> Result<Self> {
        let config_path = admin_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)?;
        serde_json::from_str(&data).map_err(|e| {
            WcError::InvalidArgument(format!("failed to parse {}: {}", config_path.display(), e))
        })
    }

    /// Save config to an administrative directory.
    pub fn save(&self, admin_dir: &Path) -> Result<()> {
        let config_path = admin_dir.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| WcError::InvalidArgument(e.to_string()))?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = WcConfig::load(dir.path()).unwrap();
        assert!(config.enforce_empty_work_queue);
        assert_eq!(config.executor, ExecutorConfig::Pool { workers: 4 });
    }

    #[test]
    fn test_partial_file_and_save() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "enforce_empty_work_queue": false, "executor": { "kind": "inline" } }"#,
        )
        .unwrap();
        let mut config = WcConfig::load(dir.path()).unwrap();
        assert!(!config.enforce_empty_work_queue);
        assert_eq!(config.executor, ExecutorConfig::Inline);
        assert_eq!(config.busy_timeout_ms, 10_000);

        config.use_commit_times = true;
        config.save(dir.path()).unwrap();
        assert!(WcConfig::load(dir.path()).unwrap().use_commit_times);
    }

    #[test]
    fn test_bad_json_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{ nope").unwrap();
        assert!(matches!(WcConfig::load(dir.path()), Err(WcError::InvalidArgument(_))));
    }
}
