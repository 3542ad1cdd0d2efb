//! Store configuration via `kiwi.toml`
//!
//! Picks a backend and, optionally, wraps it in a [`CachedStore`].
//! On first use a default `kiwi.toml` can be written next to the data;
//! to change settings, edit the file and reopen.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use kiwi_core::{Error, Result, VersionedStore};

use crate::cached::CachedStore;
use crate::fs::{FileStore, FileStoreOptions};
use crate::sqlite::{SqliteStore, DEFAULT_BUSY_TIMEOUT};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "kiwi.toml";

/// Which storage medium to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One file per version, see [`FileStore`]
    Filesystem,
    /// One row per version, see [`SqliteStore`]
    Sqlite,
}

/// `[filesystem]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Existing, readable and writable directory
    pub root: PathBuf,
    /// When false, `rem` reports `Unsupported`
    #[serde(default = "default_allow_remove")]
    pub allow_remove: bool,
}

fn default_allow_remove() -> bool {
    true
}

/// `[sqlite]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, created if missing
    pub path: PathBuf,
    /// Milliseconds a writer waits on another connection's lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}

/// Store configuration loaded from `kiwi.toml`
///
/// # Example
///
/// ```toml
/// backend = "sqlite"
/// cache = true
///
/// [sqlite]
/// path = "kiwi.db"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to open
    pub backend: Backend,
    /// Wrap the backend in a per-instance read cache
    #[serde(default)]
    pub cache: bool,
    /// Settings for `backend = "filesystem"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemConfig>,
    /// Settings for `backend = "sqlite"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<SqliteConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Filesystem,
            cache: true,
            filesystem: Some(FilesystemConfig {
                root: PathBuf::from("data"),
                allow_remove: true,
            }),
            sqlite: None,
        }
    }
}

impl StoreConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Kiwi store configuration
#
# Backend: "filesystem" (default) or "sqlite"
#   "filesystem" = one file per version plus a hard-linked latest pointer
#   "sqlite"     = one row per version in a single table
backend = "filesystem"

# Remember has/get/time results in memory (default: false when omitted)
cache = true

[filesystem]
root = "data"
# When false, removing a page reports "unsupported" and keeps its history
allow_remove = true

# [sqlite]
# path = "kiwi.db"
# busy_timeout_ms = 5000
"#
    }

    /// Parse config from TOML text
    ///
    /// # Errors
    ///
    /// `Error::Config` if the text does not parse or the selected
    /// backend has no section.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path
    ///
    /// Relative paths inside the file are resolved against the file's
    /// directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        match self.backend {
            Backend::Filesystem if self.filesystem.is_none() => Err(Error::Config(
                "backend \"filesystem\" needs a [filesystem] section".to_string(),
            )),
            Backend::Sqlite if self.sqlite.is_none() => Err(Error::Config(
                "backend \"sqlite\" needs a [sqlite] section".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        if let Some(fs) = &mut self.filesystem {
            if fs.root.is_relative() {
                fs.root = base.join(&fs.root);
            }
        }
        if let Some(sqlite) = &mut self.sqlite {
            if sqlite.path.is_relative() {
                sqlite.path = base.join(&sqlite.path);
            }
        }
    }

    /// Open the configured store
    ///
    /// # Errors
    ///
    /// `Error::Config` if the backend section is missing or the backend
    /// refuses its target.
    pub fn open(&self) -> Result<Box<dyn VersionedStore>> {
        self.validate()?;
        let store: Box<dyn VersionedStore> = match self.backend {
            Backend::Filesystem => {
                let fs = self.filesystem.as_ref().ok_or_else(|| {
                    Error::Config("missing [filesystem] section".to_string())
                })?;
                let options = FileStoreOptions {
                    allow_remove: fs.allow_remove,
                };
                let store = FileStore::open_with_options(&fs.root, options)?;
                self.wrap(store)
            }
            Backend::Sqlite => {
                let sqlite = self
                    .sqlite
                    .as_ref()
                    .ok_or_else(|| Error::Config("missing [sqlite] section".to_string()))?;
                let timeout = Duration::from_millis(sqlite.busy_timeout_ms);
                let store = SqliteStore::open_with_timeout(&sqlite.path, timeout)?;
                self.wrap(store)
            }
        };
        info!(target: "kiwi::config", backend = ?self.backend, cache = self.cache, "Store ready");
        Ok(store)
    }

    fn wrap<S: VersionedStore + 'static>(&self, store: S) -> Box<dyn VersionedStore> {
        if self.cache {
            Box::new(CachedStore::new(store))
        } else {
            Box::new(store)
        }
    }
}
