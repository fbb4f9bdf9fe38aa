// src/repository/cache.rs

//! On-disk cache of a single repository
//!
//! Layout of `<cache-root>/<id>-<hash>/`:
//!
//! ```text
//! repodata/        raw metadata as retrieved (repomd.xml, primary.xml.gz, ...)
//! packages/        downloaded package payloads
//! solv/            binary indices (<id>.solv, <id>-<kind>.solvx)
//! attrs/           flag files, e.g. "expired"
//! metalink.xml     last retrieved metalink
//! mirrorlist       last retrieved mirrorlist
//! ```
//!
//! Bulk removal never stops at the first failure: every unremovable
//! entry is logged and counted in [`RemoveStatistics`].

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const CACHE_METADATA_DIR: &str = "repodata";
pub const CACHE_PACKAGES_DIR: &str = "packages";
pub const CACHE_SOLV_DIR: &str = "solv";
pub const CACHE_ATTRS_DIR: &str = "attrs";
pub const CACHE_METALINK_FILE: &str = "metalink.xml";
pub const CACHE_MIRRORLIST_FILE: &str = "mirrorlist";

/// Attribute marking the cache as expired regardless of its age
pub const ATTRIBUTE_EXPIRED: &str = "expired";

/// Number of hash bytes in a cache directory name
const CACHE_ID_HASH_BYTES: usize = 8;

/// Outcome of a bulk removal
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoveStatistics {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub bytes_removed: u64,
    pub errors: usize,
}

impl AddAssign for RemoveStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.files_removed += rhs.files_removed;
        self.dirs_removed += rhs.dirs_removed;
        self.bytes_removed += rhs.bytes_removed;
        self.errors += rhs.errors;
    }
}

impl Add for RemoveStatistics {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

/// Derive the cache directory name for a repository
///
/// `<id>-<hex of the first 8 bytes of sha256(source)>`, where source is
/// the metalink, else the mirrorlist, else the first base URL, else the
/// repository id.
pub fn derive_cache_id(config: &RepositoryConfig) -> String {
    let source = config
        .metalink
        .as_deref()
        .or(config.mirrorlist.as_deref())
        .or(config.baseurl.first().map(String::as_str))
        .unwrap_or(&config.id);

    let digest = Sha256::digest(source.as_bytes());
    format!("{}-{}", config.id, hex::encode(&digest[..CACHE_ID_HASH_BYTES]))
}

/// Recover the repository id from a cache directory name
pub fn repoid_from_cache_dir(dir_name: &str) -> Option<&str> {
    let (id, hash) = dir_name.rsplit_once('-')?;
    if id.is_empty()
        || hash.len() != CACHE_ID_HASH_BYTES * 2
        || !hash.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }
    Some(id)
}

/// Recursively remove `path`, counting what was removed
fn remove_recursive(path: &Path) -> RemoveStatistics {
    let mut stats = RemoveStatistics::default();

    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return stats,
        Err(e) => {
            warn!("Cannot access {}: {}", path.display(), e);
            stats.errors += 1;
            return stats;
        }
    }

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot walk cache entry: {}", e);
                stats.errors += 1;
                continue;
            }
        };

        let entry_path = entry.path();
        if entry.file_type().is_dir() {
            match fs::remove_dir(entry_path) {
                Ok(()) => stats.dirs_removed += 1,
                Err(e) => {
                    warn!("Cannot remove directory {}: {}", entry_path.display(), e);
                    stats.errors += 1;
                }
            }
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(entry_path) {
                Ok(()) => {
                    stats.files_removed += 1;
                    stats.bytes_removed += size;
                }
                Err(e) => {
                    warn!("Cannot remove file {}: {}", entry_path.display(), e);
                    stats.errors += 1;
                }
            }
        }
    }

    stats
}

/// Copy a file or directory tree, replacing the destination
fn copy_recursive(src: &Path, dest: &Path) -> Result<()> {
    if src.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        return Ok(());
    }

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::Filesystem(format!("Cannot walk {}: {e}", src.display())))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Filesystem(e.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Handle to one repository's cache directory
#[derive(Debug, Clone)]
pub struct RepoCache {
    cache_dir: PathBuf,
}

impl RepoCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache for `config` under `cache_root`
    pub fn for_repo(cache_root: &Path, config: &RepositoryConfig) -> Self {
        Self::new(cache_root.join(derive_cache_id(config)))
    }

    /// All repository caches found under `cache_root`
    pub fn list(cache_root: &Path) -> Result<Vec<Self>> {
        let entries = match fs::read_dir(cache_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Filesystem(format!(
                    "Cannot iterate the cache directory \"{}\": {e}",
                    cache_root.display()
                )));
            }
        };

        let mut caches: Vec<Self> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|e| repoid_from_cache_dir(&e.file_name().to_string_lossy()).is_some())
            .map(|e| Self::new(e.path()))
            .collect();
        caches.sort_by(|a, b| a.cache_dir.cmp(&b.cache_dir));
        Ok(caches)
    }

    pub fn path(&self) -> &Path {
        &self.cache_dir
    }

    /// Repository id encoded in the directory name
    pub fn repo_id(&self) -> Option<String> {
        let name = self.cache_dir.file_name()?.to_string_lossy();
        repoid_from_cache_dir(&name).map(str::to_string)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.cache_dir.join(CACHE_METADATA_DIR)
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.cache_dir.join(CACHE_PACKAGES_DIR)
    }

    pub fn solv_dir(&self) -> PathBuf {
        self.cache_dir.join(CACHE_SOLV_DIR)
    }

    pub fn attrs_dir(&self) -> PathBuf {
        self.cache_dir.join(CACHE_ATTRS_DIR)
    }

    pub fn metalink_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_METALINK_FILE)
    }

    pub fn mirrorlist_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_MIRRORLIST_FILE)
    }

    pub fn repomd_path(&self) -> PathBuf {
        self.metadata_dir().join("repomd.xml")
    }

    /// Remove downloaded metadata and the cached mirror documents
    pub fn remove_metadata(&self) -> RemoveStatistics {
        debug!("Removing metadata from {}", self.cache_dir.display());
        remove_recursive(&self.metadata_dir())
            + remove_recursive(&self.mirrorlist_path())
            + remove_recursive(&self.metalink_path())
    }

    pub fn remove_packages(&self) -> RemoveStatistics {
        remove_recursive(&self.packages_dir())
    }

    pub fn remove_binary_indices(&self) -> RemoveStatistics {
        remove_recursive(&self.solv_dir())
    }

    pub fn remove_attributes(&self) -> RemoveStatistics {
        remove_recursive(&self.attrs_dir())
    }

    /// Remove everything, including the cache directory itself
    pub fn remove_all(&self) -> RemoveStatistics {
        let mut stats = self.remove_metadata();
        stats += self.remove_packages();
        stats += self.remove_binary_indices();
        stats += self.remove_attributes();
        stats += remove_recursive(&self.cache_dir);
        stats
    }

    fn attribute_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(Error::Configuration(format!("Invalid attribute name \"{name}\"")));
        }
        Ok(self.attrs_dir().join(name))
    }

    /// Write a flag file under `attrs/`
    pub fn write_attribute(&self, name: &str, value: &str) -> Result<()> {
        let path = self.attribute_path(name)?;
        fs::create_dir_all(self.attrs_dir()).map_err(|e| {
            Error::Filesystem(format!("Cannot create {}: {e}", self.attrs_dir().display()))
        })?;
        fs::write(&path, value)
            .map_err(|e| Error::Filesystem(format!("Cannot write {}: {e}", path.display())))
    }

    /// Read a flag file; `None` if it does not exist
    pub fn read_attribute(&self, name: &str) -> Result<Option<String>> {
        let path = self.attribute_path(name)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Filesystem(format!("Cannot read {}: {e}", path.display()))),
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute_path(name).is_ok_and(|p| p.is_file())
    }

    /// Remove a flag file; returns whether it existed
    pub fn clear_attribute(&self, name: &str) -> Result<bool> {
        let path = self.attribute_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Filesystem(format!("Cannot remove {}: {e}", path.display()))),
        }
    }

    /// Replace metadata, mirror documents and binary indices with copies
    /// taken from `source`
    pub fn clone_from(&self, source: &RepoCache) -> Result<()> {
        debug!(
            "Cloning cache {} -> {}",
            source.path().display(),
            self.cache_dir.display()
        );
        fs::create_dir_all(&self.cache_dir)?;

        let parts = [
            (source.metadata_dir(), self.metadata_dir()),
            (source.metalink_path(), self.metalink_path()),
            (source.mirrorlist_path(), self.mirrorlist_path()),
            (source.solv_dir(), self.solv_dir()),
        ];
        for (src, dest) in parts {
            if !src.exists() {
                continue;
            }
            let stats = remove_recursive(&dest);
            if stats.errors > 0 {
                return Err(Error::Filesystem(format!(
                    "Cannot replace {} while cloning cache",
                    dest.display()
                )));
            }
            copy_recursive(&src, &dest)?;
        }
        Ok(())
    }
}
