//! Resolves the routing script's location.

use std::fs;
use std::io;
use std::path::{self, Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

/// Default script locations relative to the home directory, in search order.
const DEFAULT_CANDIDATES: &[&str] = &[
    ".switchyard.rhai",
    ".config/switchyard.rhai",
    ".config/switchyard/switchyard.rhai",
];

/// The on-disk routing script at the time it was located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDescriptor {
    /// Script path.
    pub path: PathBuf,
    /// Modification time observed during resolution.
    pub modified: SystemTime,
}

/// Errors raised while locating the routing script.
#[derive(Debug, Error)]
pub enum LocateError {
    /// The explicitly configured script does not exist.
    #[error("configured script '{}' does not exist", .path.display())]
    Explicit {
        /// Path that was configured.
        path: PathBuf,
    },
    /// None of the default candidates exist.
    #[error("no routing script found (tried {})", display_paths(.tried))]
    NoCandidate {
        /// Every candidate that was checked.
        tried: Vec<PathBuf>,
    },
    /// The script exists but its metadata could not be read.
    #[error("failed to inspect '{}': {source}", .path.display())]
    Metadata {
        /// Script path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl LocateError {
    /// Returns `true` when no script is configured or discoverable.
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::NoCandidate { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing, home directory unknown".to_owned();
    }
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Finds the routing script from an override or the default candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocator {
    custom: Option<PathBuf>,
    home: Option<PathBuf>,
}

impl ConfigLocator {
    /// Builds a locator rooted at the user's home directory.
    pub fn new(custom: Option<PathBuf>) -> Self {
        Self::with_home(custom, dirs::home_dir())
    }

    /// Builds a locator with an explicit home directory.
    ///
    /// Relative paths are anchored at the current directory so they compare
    /// equal to the absolute paths filesystem notifications carry.
    pub fn with_home(custom: Option<PathBuf>, home: Option<PathBuf>) -> Self {
        let home = home.map(anchor);
        let custom = custom.map(|path| anchor(expand_home(&path, home.as_deref())));
        Self { custom, home }
    }

    /// The override path, after home expansion and anchoring.
    pub fn custom(&self) -> Option<&Path> {
        self.custom.as_deref()
    }

    /// Paths the locator checks, in order.
    ///
    /// With an override this is the override alone.
    pub fn candidates(&self) -> Vec<PathBuf> {
        if let Some(custom) = &self.custom {
            return vec![custom.clone()];
        }
        self.home
            .as_deref()
            .map(|home| {
                DEFAULT_CANDIDATES
                    .iter()
                    .map(|relative| home.join(relative))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolves the script. Never creates files.
    pub fn resolve(&self) -> Result<ConfigDescriptor, LocateError> {
        if let Some(custom) = &self.custom {
            if !custom.is_file() {
                return Err(LocateError::Explicit {
                    path: custom.clone(),
                });
            }
            return describe(custom);
        }

        let tried = self.candidates();
        match tried.iter().find(|candidate| candidate.is_file()) {
            Some(found) => describe(found),
            None => Err(LocateError::NoCandidate { tried }),
        }
    }
}

fn describe(path: &Path) -> Result<ConfigDescriptor, LocateError> {
    let modified = fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|source| LocateError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(ConfigDescriptor {
        path: path.to_path_buf(),
        modified,
    })
}

fn anchor(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    path::absolute(&path).unwrap_or(path)
}

fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    if path == Path::new("~") {
        return home.to_path_buf();
    }
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
