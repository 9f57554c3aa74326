use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cal_index::IndexConfig;
use cal_rollup::RollupConfig;
use cal_store::{FileStoreConfig, SyncMode};

use crate::error::{LedgerError, LedgerResult};

/// Where pages, chapters and books are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Nothing survives the process.
    #[default]
    Memory,
    /// Framed logs plus a header in `storage.dir`.
    File,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub dir: Option<PathBuf>,
    pub sync: SyncMode,
}

impl StorageConfig {
    pub fn file_store_config(&self) -> FileStoreConfig {
        FileStoreConfig { sync: self.sync }
    }
}

/// Complete ledger configuration, usually read from TOML.
///
/// ```toml
/// [storage]
/// backend = "file"
/// dir = "/var/lib/cal"
/// sync = "every_write"
///
/// [rollup]
/// pages_per_chapter = 100
/// chapters_per_book = 10
/// auto = true
///
/// [index]
/// time_bucket_ms = 3600000
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub storage: StorageConfig,
    pub rollup: RollupConfig,
    pub index: IndexConfig,
}

impl LedgerConfig {
    /// Defaults with a file backend rooted at `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                backend: Backend::File,
                dir: Some(dir.into()),
                sync: SyncMode::default(),
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> LedgerResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.storage.backend == Backend::File && self.storage.dir.is_none() {
            return Err(LedgerError::Config(
                "storage.dir is required for the file backend".into(),
            ));
        }
        self.rollup.validate()?;
        self.index.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = LedgerConfig::default();
        assert_eq!(c.storage.backend, Backend::Memory);
        assert!(c.storage.dir.is_none());
        assert_eq!(c.storage.sync, SyncMode::EveryWrite);
        assert_eq!(c.rollup.pages_per_chapter, 100);
        assert_eq!(c.rollup.chapters_per_book, 10);
        assert!(c.rollup.auto);
        assert_eq!(c.index.time_bucket_ms, 3_600_000);
        c.validate().unwrap();
    }

    #[test]
    fn full_toml() {
        let c = LedgerConfig::from_toml_str(
            r#"
            [storage]
            backend = "file"
            dir = "/var/lib/cal"
            sync = "os_default"

            [rollup]
            pages_per_chapter = 50
            chapters_per_book = 4
            auto = false

            [index]
            time_bucket_ms = 60000
            "#,
        )
        .unwrap();
        assert_eq!(c.storage.backend, Backend::File);
        assert_eq!(c.storage.dir, Some(PathBuf::from("/var/lib/cal")));
        assert_eq!(c.storage.sync, SyncMode::OsDefault);
        assert_eq!(c.rollup.pages_per_chapter, 50);
        assert_eq!(c.rollup.chapters_per_book, 4);
        assert!(!c.rollup.auto);
        assert_eq!(c.index.time_bucket_ms, 60_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = LedgerConfig::from_toml_str("[rollup]\npages_per_chapter = 10\n").unwrap();
        assert_eq!(c.rollup.pages_per_chapter, 10);
        assert_eq!(c.rollup.chapters_per_book, 10);
        assert_eq!(c.storage, StorageConfig::default());
    }

    #[test]
    fn file_backend_needs_a_dir() {
        let err = LedgerConfig::from_toml_str("[storage]\nbackend = \"file\"\n").unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        assert!(LedgerConfig::from_toml_str("[rollup]\npages_per_chapter = 0\n").is_err());
        assert!(LedgerConfig::from_toml_str("[index]\ntime_bucket_ms = 0\n").is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = LedgerConfig::from_toml_str("[storage]\nbackend = \"s3\"\n").unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn toml_roundtrip_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let original = LedgerConfig::file(dir.path().join("ledger"));
        let path = dir.path().join("cal.toml");
        std::fs::write(&path, original.to_toml_string().unwrap()).unwrap();
        assert_eq!(LedgerConfig::load(&path).unwrap(), original);
        assert!(LedgerConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
