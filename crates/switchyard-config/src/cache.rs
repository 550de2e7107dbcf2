//! Derives the on-disk cache layout shared by the build pipeline.
//!
//! Every artefact the dispatcher persists lives below a single per-user
//! directory so separate process instances agree on where to look:
//!
//! ```text
//! <cache>/
//!   config_cache_<hash>.json   current bundle record (one per app version)
//!   bundle_<hash>.rhai         bundled scripts
//!   transform/                 transformed legacy sources
//!   last_update_check.json     update polling record
//!   requests.log               optional request log
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

const TRANSFORM_DIR: &str = "transform";
const UPDATE_RECORD: &str = "last_update_check.json";
const REQUEST_LOG: &str = "requests.log";

/// Canonical paths for the dispatcher's cache artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    root: PathBuf,
    transform_dir: PathBuf,
    update_record: PathBuf,
    request_log: PathBuf,
}

impl CachePaths {
    /// Derives the layout from configuration and creates the directories.
    pub fn from_config(config: &Config) -> Result<Self, CachePathsError> {
        Self::create(config.cache_dir().as_std_path())
    }

    /// Creates the layout beneath an explicit root.
    pub fn create(root: &Path) -> Result<Self, CachePathsError> {
        let paths = Self::under(root);
        for directory in [&paths.root, &paths.transform_dir] {
            fs::create_dir_all(directory).map_err(|source| CachePathsError::Directory {
                path: directory.clone(),
                source,
            })?;
        }
        Ok(paths)
    }

    fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            transform_dir: root.join(TRANSFORM_DIR),
            update_record: root.join(UPDATE_RECORD),
            request_log: root.join(REQUEST_LOG),
        }
    }

    /// Root cache directory.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Directory holding transformed legacy sources.
    pub fn transform_dir(&self) -> &Path {
        self.transform_dir.as_path()
    }

    /// Record tracking the last update check.
    pub fn update_record(&self) -> &Path {
        self.update_record.as_path()
    }

    /// Append-only log of routed requests.
    pub fn request_log(&self) -> &Path {
        self.request_log.as_path()
    }
}

/// Errors raised while preparing the cache layout.
#[derive(Debug, Error)]
pub enum CachePathsError {
    /// Creating a cache directory failed.
    #[error("failed to prepare cache directory '{path}': {source}")]
    Directory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
