//! FileStore: one file per version, hard-linked latest pointer
//!
//! On-disk layout inside the store root:
//!
//! - `<key>.<version>`: raw payload of one version, written once
//! - `<key>!`: hard link to the highest version file of `key`
//! - `.kiwi.lock`: lock file serializing writers across threads and processes
//!
//! # Write protocol
//!
//! 1. Take the in-process mutex, then an exclusive `fs2` lock on `.kiwi.lock`
//! 2. Scan the root for `<key>.<n>` and pick `max + 1` (or 0)
//! 3. Write the payload to a hidden temp file and fsync it
//! 4. Hard-link the temp file to `<key>.<version>` (fails if it exists)
//! 5. Hard-link the version file to a hidden temp pointer and rename it
//!    over `<key>!`, so readers never observe a missing pointer
//! 6. Remove the temp file and fsync the root directory
//!
//! A reader following `<key>!` therefore always lands on a fully written
//! version. Hidden names (leading `.`) are never valid keys, so temp files
//! cannot collide with stored data.
//!
//! The temp file stays until the pointer has moved, and `rem` leaves a
//! hidden `.<key>!.removing` marker while it deletes. Recovery only deletes
//! version files one of these names vouches for. Anything else in the root,
//! such as a `backup.2024` the store never wrote, is left alone.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use kiwi_core::{Error, Result, Timestamp, Version, VersionedStore};

/// Name of the lock file held while writing
pub const LOCK_FILE_NAME: &str = ".kiwi.lock";

/// Marker appended to a key to name its latest pointer
pub const POINTER_MARKER: char = '!';

/// Longest key (in bytes) the filesystem layout can encode
pub const MAX_KEY_LEN: usize = 200;

const TEMP_SUFFIX: &str = ".tmp";

/// Suffix of the marker `rem` holds while deleting, after the hidden `.<key>`
const REMOVAL_SUFFIX: &str = "!.removing";

/// Options for opening a [`FileStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStoreOptions {
    /// Allow `rem` to delete history. When false, `rem` reports
    /// `Error::Unsupported` and leaves every file in place.
    pub allow_remove: bool,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self { allow_remove: true }
    }
}

/// What open-time recovery repaired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Leftover temp files from interrupted writes
    pub temp_files_removed: usize,
    /// Pointers relinked to their key's highest version
    pub pointers_repaired: usize,
    /// Version files removed to roll back an unacknowledged first write
    /// or to finish an interrupted `rem`
    pub orphans_removed: usize,
}

/// Filesystem-backed versioned store
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    options: FileStoreOptions,
    /// Open handle on `.kiwi.lock`; the mutex serializes threads, the
    /// file lock serializes processes.
    lock_file: Mutex<File>,
}

/// Holds both write locks; the file lock is released on drop
struct WriteGuard<'a> {
    file: MutexGuard<'a, File>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&*self.file) {
            warn!(target: "kiwi::fs", error = %e, "Failed to release store lock");
        }
    }
}

impl FileStore {
    /// Open a store rooted at `root` with default options
    ///
    /// # Errors
    ///
    /// `Error::Config` if the directory is missing, not a directory, not
    /// readable, or not writable.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::open_with_options(root, FileStoreOptions::default())
    }

    /// Open a store rooted at `root`
    ///
    /// Runs recovery before returning, so pointers left stale by an
    /// interrupted write are repaired.
    pub fn open_with_options<P: AsRef<Path>>(root: P, options: FileStoreOptions) -> Result<Self> {
        let root = Self::check_root(root.as_ref())?;

        let lock_path = root.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::Config(format!(
                    "directory '{}' is not writable: {}",
                    root.display(),
                    e
                ))
            })?;

        let store = FileStore {
            root,
            options,
            lock_file: Mutex::new(lock_file),
        };
        let stats = store.recover()?;

        info!(
            target: "kiwi::fs",
            root = ?store.root,
            allow_remove = options.allow_remove,
            pointers_repaired = stats.pointers_repaired,
            orphans_removed = stats.orphans_removed,
            "Opened file store"
        );
        Ok(store)
    }

    /// Canonical path of the store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_root(root: &Path) -> Result<PathBuf> {
        let canonical = root.canonicalize().map_err(|e| {
            Error::Config(format!("directory '{}' does not exist: {}", root.display(), e))
        })?;
        let meta = fs::metadata(&canonical)?;
        if !meta.is_dir() {
            return Err(Error::Config(format!(
                "'{}' is not a directory",
                canonical.display()
            )));
        }
        fs::read_dir(&canonical).map_err(|e| {
            Error::Config(format!(
                "directory '{}' is not readable: {}",
                canonical.display(),
                e
            ))
        })?;
        if meta.permissions().readonly() {
            return Err(Error::Config(format!(
                "directory '{}' is not writable",
                canonical.display()
            )));
        }
        Ok(canonical)
    }

    fn lock_writes(&self) -> Result<WriteGuard<'_>> {
        let file = self.lock_file.lock();
        FileExt::lock_exclusive(&*file)?;
        Ok(WriteGuard { file })
    }

    fn version_path(&self, key: &str, version: Version) -> PathBuf {
        self.root.join(format!("{key}.{version}"))
    }

    fn pointer_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{POINTER_MARKER}"))
    }

    fn temp_path(&self, key: &str, version: Version) -> PathBuf {
        self.root.join(format!(".{key}.{version}{TEMP_SUFFIX}"))
    }

    fn removal_marker_path(&self, key: &str) -> PathBuf {
        self.root.join(format!(".{key}{REMOVAL_SUFFIX}"))
    }

    fn resolve(&self, key: &str, version: Option<Version>) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(match version {
            Some(v) => self.version_path(key, v),
            None => self.pointer_path(key),
        })
    }

    /// Highest version file present for `key`
    fn current_version(&self, key: &str) -> Result<Option<Version>> {
        let mut max = None;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some((k, v)) = parse_version_file(&name) {
                if k == key && max.map_or(true, |m| v > m) {
                    max = Some(v);
                }
            }
        }
        Ok(max)
    }

    /// Point `<key>!` at `target` with a single atomic rename
    fn switch_pointer(&self, key: &str, target: &Path) -> Result<()> {
        let temp = self
            .root
            .join(format!(".{key}{POINTER_MARKER}{TEMP_SUFFIX}"));
        remove_if_exists(&temp)?;
        fs::hard_link(target, &temp)?;
        fs::rename(&temp, self.pointer_path(key))?;
        Ok(())
    }

    fn sync_root(&self) -> Result<()> {
        #[cfg(unix)]
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    /// Repair state left behind by interrupted writes or deletions
    ///
    /// - a `.<key>!.removing` marker means `rem` was cut short: the key's
    ///   pointer and version files are deleted, then the marker
    /// - a `.<key>.<n>.tmp` file hard-linked to `<key>.<n>` of a key with no
    ///   pointer is a first write that never returned: both are deleted
    /// - other hidden temp files are deleted
    /// - a pointer not linked to its key's highest version is relinked
    ///
    /// Version files without a pointer and without one of these markers are
    /// not ours to judge. They are logged and left in place.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let _guard = self.lock_writes()?;
        let mut stats = RecoveryStats::default();
        let mut versions: BTreeMap<String, BTreeSet<Version>> = BTreeMap::new();
        let mut pointers = BTreeSet::new();
        let mut pending = Vec::new();
        let mut removals = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(hidden) = name.strip_prefix('.') {
                if let Some(key) = hidden.strip_suffix(REMOVAL_SUFFIX) {
                    removals.push(key.to_string());
                } else if let Some(stem) = hidden.strip_suffix(TEMP_SUFFIX) {
                    match parse_version_file(stem) {
                        Some((key, version)) => pending.push((key.to_string(), version)),
                        None => {
                            warn!(target: "kiwi::fs", file = %name, "Removing leftover temp file");
                            fs::remove_file(entry.path())?;
                            stats.temp_files_removed += 1;
                        }
                    }
                }
            } else if let Some(key) = name.strip_suffix(POINTER_MARKER) {
                pointers.insert(key.to_string());
            } else if let Some((key, version)) = parse_version_file(&name) {
                versions.entry(key.to_string()).or_default().insert(version);
            }
        }

        for key in &removals {
            let doomed = versions.remove(key).unwrap_or_default();
            warn!(
                target: "kiwi::fs",
                key = %key,
                files = doomed.len(),
                "Finishing interrupted removal"
            );
            if pointers.remove(key) {
                remove_if_exists(&self.pointer_path(key))?;
            }
            for v in doomed.iter().rev() {
                fs::remove_file(self.version_path(key, *v))?;
                stats.orphans_removed += 1;
            }
            fs::remove_file(self.removal_marker_path(key))?;
        }

        for (key, version) in pending {
            let temp = self.temp_path(&key, version);
            if !pointers.contains(&key) {
                if let Some(found) = versions.get_mut(&key) {
                    let final_path = self.version_path(&key, version);
                    if found.contains(&version) && same_file(&temp, &final_path)? {
                        warn!(
                            target: "kiwi::fs",
                            key = %key,
                            version = %version,
                            "Rolling back unacknowledged first write"
                        );
                        fs::remove_file(&final_path)?;
                        found.remove(&version);
                        stats.orphans_removed += 1;
                    }
                }
            }
            warn!(target: "kiwi::fs", key = %key, version = %version, "Removing leftover temp file");
            fs::remove_file(&temp)?;
            stats.temp_files_removed += 1;
        }

        for (key, found) in versions {
            let Some(&latest) = found.last() else {
                continue;
            };
            if !pointers.contains(&key) {
                warn!(
                    target: "kiwi::fs",
                    key = %key,
                    files = found.len(),
                    "Leaving version-like files without a pointer in place"
                );
                continue;
            }

            let latest_path = self.version_path(&key, latest);
            if !same_file(&self.pointer_path(&key), &latest_path)? {
                warn!(
                    target: "kiwi::fs",
                    key = %key,
                    version = %latest,
                    "Relinking stale pointer"
                );
                self.switch_pointer(&key, &latest_path)?;
                stats.pointers_repaired += 1;
            }
        }

        if stats != RecoveryStats::default() || !removals.is_empty() {
            self.sync_root()?;
        }
        Ok(stats)
    }
}

impl VersionedStore for FileStore {
    fn has(&self, key: &str, version: Option<Version>) -> Result<bool> {
        let path = self.resolve(key, version)?;
        Ok(path.try_exists()?)
    }

    fn get(&self, key: &str, version: Option<Version>) -> Result<Vec<u8>> {
        let path = self.resolve(key, version)?;
        fs::read(&path).map_err(|e| not_found_or_io(e, key, version))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<Version> {
        validate_key(key)?;
        let _guard = self.lock_writes()?;

        let version = Version::after(self.current_version(key)?);
        let final_path = self.version_path(key, version);
        let temp_path = self.temp_path(key, version);

        if let Err(e) = write_synced(&temp_path, value) {
            discard(&temp_path);
            return Err(e);
        }

        // hard_link refuses to overwrite, so a version number is never reused
        if let Err(e) = fs::hard_link(&temp_path, &final_path) {
            discard(&temp_path);
            return Err(if e.kind() == io::ErrorKind::AlreadyExists {
                Error::Corruption(format!(
                    "version file '{}' already exists",
                    final_path.display()
                ))
            } else {
                Error::Io(e)
            });
        }

        // A version file above the pointer must not outlive a failed put
        if let Err(e) = self.switch_pointer(key, &final_path) {
            discard(&final_path);
            discard(&temp_path);
            return Err(e);
        }
        discard(&temp_path);
        self.sync_root()?;

        debug!(target: "kiwi::fs", key = %key, version = %version, bytes = value.len(), "put");
        Ok(version)
    }

    fn rem(&self, key: &str) -> Result<bool> {
        if !self.options.allow_remove {
            return Err(Error::Unsupported("rem: deletion is disabled for this file store"));
        }
        validate_key(key)?;
        let _guard = self.lock_writes()?;

        let marker = self.removal_marker_path(key);
        File::create(&marker)?.sync_all()?;
        self.sync_root()?;

        // Pointer first: the key stops being visible before its history goes
        let mut existed = remove_if_exists(&self.pointer_path(key))?;

        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some((k, v)) = parse_version_file(&name) {
                if k == key {
                    found.push(v);
                }
            }
        }
        found.sort_unstable();
        for v in found.iter().rev() {
            existed |= remove_if_exists(&self.version_path(key, *v))?;
        }
        fs::remove_file(&marker)?;
        self.sync_root()?;

        debug!(target: "kiwi::fs", key = %key, versions = found.len(), "rem");
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(POINTER_MARKER) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    fn time(&self, key: &str, version: Option<Version>) -> Result<Timestamp> {
        let path = self.resolve(key, version)?;
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| not_found_or_io(e, key, version))?;
        Ok(Timestamp::from_system_time(modified))
    }
}

/// Reject keys that cannot be stored as a single plain file name
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        "empty"
    } else if key.len() > MAX_KEY_LEN {
        "longer than 200 bytes"
    } else if key.starts_with('.') {
        "starts with '.'"
    } else if key.contains('/') || key.contains('\\') {
        "contains a path separator"
    } else if key.contains('\0') {
        "contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(Error::invalid_key(key, reason))
}

/// Split `<key>.<version>` into its parts
///
/// The version is the last dot-separated component and must be a plain
/// decimal number without leading zeros.
fn parse_version_file(name: &str) -> Option<(&str, Version)> {
    if name.starts_with('.') {
        return None;
    }
    let (key, digits) = name.rsplit_once('.')?;
    if key.is_empty()
        || digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return None;
    }
    digits.parse::<u64>().ok().map(|n| (key, Version::new(n)))
}

fn not_found_or_io(e: io::Error, key: &str, version: Option<Version>) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::not_found(key, version)
    } else {
        Error::Io(e)
    }
}

fn write_synced(path: &Path, value: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(value)?;
    file.sync_all()?;
    Ok(())
}

/// Best-effort removal on a cleanup path; recovery sweeps what this misses
fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!(target: "kiwi::fs", path = ?path, error = %e, "Failed to clean up");
    }
}

/// Remove `path`, returning whether it existed
fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let (ma, mb) = (fs::metadata(a)?, fs::metadata(b)?);
    Ok(ma.dev() == mb.dev() && ma.ino() == mb.ino())
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> Result<bool> {
    Ok(fs::read(a)? == fs::read(b)?)
}
