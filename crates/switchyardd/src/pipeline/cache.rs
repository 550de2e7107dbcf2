//! Persistent record mapping a configuration file to its built bundle.
//!
//! The record lives in a file named after the running version, so an upgraded
//! binary never sees a predecessor's entry. A lookup is a hit only while the
//! source is unmodified and the bundle still exists.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::PIPELINE_TARGET;
use super::files::{atomic_write, prune_artifacts, short_hash};

const RECORD_PREFIX: &str = "config_cache_";
const BUNDLE_PREFIX: &str = "bundle_";
const BUNDLE_RETENTION: usize = 5;

/// Shared handle used by the dispatcher and the watch thread.
pub type CacheHandle = Arc<Mutex<ContentCache>>;

/// Wraps a cache in a [`CacheHandle`].
pub fn shared(cache: ContentCache) -> CacheHandle {
    Arc::new(Mutex::new(cache))
}

/// Locks the cache, recovering the guard from a poisoned mutex.
pub fn lock(handle: &CacheHandle) -> MutexGuard<'_, ContentCache> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Persisted cache record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Configuration file the bundle was built from.
    pub config_path: PathBuf,
    /// Bundle artefact.
    pub bundle_path: PathBuf,
    /// Source modification time in milliseconds since the Unix epoch.
    pub mod_time: u64,
    /// Version of the build that wrote the record.
    pub app_version: String,
    /// Record creation time in milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// Why a lookup did not produce a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// No record is held.
    NoEntry,
    /// The record belongs to another configuration file.
    DifferentSource,
    /// The source changed after the record was written.
    SourceModified,
    /// The record was written by another version.
    VersionMismatch,
    /// The bundle artefact no longer exists.
    ArtifactMissing,
    /// The source could not be stat'ed.
    SourceUnreadable,
}

/// Result of [`ContentCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The recorded bundle is current.
    Hit(PathBuf),
    /// The bundle must be rebuilt.
    Miss(MissReason),
}

impl CacheLookup {
    /// Returns the bundle path on a hit.
    pub fn hit(self) -> Option<PathBuf> {
        match self {
            Self::Hit(path) => Some(path),
            Self::Miss(_) => None,
        }
    }
}

/// Errors raised while persisting a record.
#[derive(Debug, Error)]
pub enum CacheIoError {
    /// Reading the source metadata failed.
    #[error("failed to stat '{path}': {source}")]
    Stat {
        /// Source path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Encoding the record failed.
    #[error("failed to encode cache record: {0}")]
    Serialise(#[from] serde_json::Error),
    /// Writing the record failed.
    #[error("failed to write cache record '{path}': {source}")]
    Write {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Version-scoped cache of the last successful build.
#[derive(Debug)]
pub struct ContentCache {
    dir: PathBuf,
    version: String,
    record_path: PathBuf,
    entry: Option<CacheEntry>,
}

impl ContentCache {
    /// Opens the cache in `dir`, loading a usable record if one exists.
    pub fn open(dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        let dir = dir.into();
        let version = version.into();
        let record_path = record_path(&dir, &version);
        let entry = load_record(&record_path).filter(|entry| {
            if entry.app_version != version {
                debug!(
                    target: PIPELINE_TARGET,
                    recorded = %entry.app_version,
                    running = %version,
                    "ignoring cache record from another version"
                );
                return false;
            }
            if !entry.bundle_path.is_file() {
                debug!(
                    target: PIPELINE_TARGET,
                    bundle = %entry.bundle_path.display(),
                    "ignoring cache record without bundle"
                );
                return false;
            }
            true
        });
        Self {
            dir,
            version,
            record_path,
            entry,
        }
    }

    /// Path of the record file for this version.
    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// Currently held record.
    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// Checks whether the recorded bundle is current for `config_path`.
    pub fn lookup(&self, config_path: &Path) -> CacheLookup {
        let Some(entry) = self.entry.as_ref() else {
            return CacheLookup::Miss(MissReason::NoEntry);
        };
        if entry.config_path != config_path {
            return CacheLookup::Miss(MissReason::DifferentSource);
        }
        if entry.app_version != self.version {
            return CacheLookup::Miss(MissReason::VersionMismatch);
        }
        match modified_millis(config_path) {
            Ok(modified) if modified > entry.mod_time => {
                return CacheLookup::Miss(MissReason::SourceModified);
            }
            Ok(_) => {}
            Err(_) => return CacheLookup::Miss(MissReason::SourceUnreadable),
        }
        if !entry.bundle_path.is_file() {
            return CacheLookup::Miss(MissReason::ArtifactMissing);
        }
        CacheLookup::Hit(entry.bundle_path.clone())
    }

    /// Records `bundle_path` as the build of `config_path`.
    pub fn store(&mut self, config_path: &Path, bundle_path: &Path) -> Result<(), CacheIoError> {
        let mod_time = modified_millis(config_path).map_err(|source| CacheIoError::Stat {
            path: config_path.to_path_buf(),
            source,
        })?;
        let entry = CacheEntry {
            config_path: config_path.to_path_buf(),
            bundle_path: bundle_path.to_path_buf(),
            mod_time,
            app_version: self.version.clone(),
            created_at: now_millis(),
        };
        let encoded = serde_json::to_vec_pretty(&entry)?;
        atomic_write(&self.record_path, &encoded).map_err(|source| CacheIoError::Write {
            path: self.record_path.clone(),
            source,
        })?;
        self.entry = Some(entry);
        self.sweep(bundle_path);
        Ok(())
    }

    /// Drops the held record and deletes its file.
    pub fn invalidate(&mut self) {
        self.entry = None;
        match fs::remove_file(&self.record_path) {
            Ok(()) => debug!(target: PIPELINE_TARGET, "cache record invalidated"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: PIPELINE_TARGET,
                path = %self.record_path.display(),
                error = %error,
                "failed to remove cache record"
            ),
        }
    }

    fn sweep(&self, bundle_path: &Path) {
        let sweeps = [
            (BUNDLE_PREFIX, BUNDLE_RETENTION, bundle_path),
            (RECORD_PREFIX, 1, self.record_path.as_path()),
        ];
        for (prefix, keep, protect) in sweeps {
            if let Err(error) = prune_artifacts(&self.dir, prefix, keep, protect) {
                warn!(
                    target: PIPELINE_TARGET,
                    prefix,
                    error = %error,
                    "cache retention sweep failed"
                );
            }
        }
    }
}

fn record_path(dir: &Path, version: &str) -> PathBuf {
    dir.join(format!("{RECORD_PREFIX}{}.json", short_hash(&[version], 8)))
}

fn load_record(path: &Path) -> Option<CacheEntry> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!(
                target: PIPELINE_TARGET,
                path = %path.display(),
                error = %error,
                "failed to read cache record"
            );
            return None;
        }
    };
    serde_json::from_slice(&bytes)
        .map_err(|error| {
            warn!(
                target: PIPELINE_TARGET,
                path = %path.display(),
                error = %error,
                "discarding unreadable cache record"
            );
        })
        .ok()
}

fn modified_millis(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(millis_since_epoch(modified))
}

fn now_millis() -> u64 {
    millis_since_epoch(SystemTime::now())
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
