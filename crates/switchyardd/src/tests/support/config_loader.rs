//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;
use switchyard_config::Config;

use crate::bootstrap::ConfigLoader;

/// Loader that places the cache under a temporary directory.
#[derive(Clone)]
pub struct TestConfigLoader {
    dir: Arc<TempDir>,
    script: Option<PathBuf>,
    idle_timeout_ms: Option<u64>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary cache directory");
        Self {
            dir: Arc::new(dir),
            script: None,
            idle_timeout_ms: None,
        }
    }

    /// Points `--config` at `path`.
    #[must_use]
    pub fn with_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.script = Some(path.into());
        self
    }

    /// Overrides the idle timeout.
    #[must_use]
    pub fn with_idle_timeout_ms(mut self, millis: u64) -> Self {
        self.idle_timeout_ms = Some(millis);
        self
    }

    /// Temporary directory backing the cache.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    fn utf8(path: &Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf())
            .expect("temporary path was not valid UTF-8")
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let defaults = Config::default();
        Ok(Config {
            config: self.script.as_deref().map(Self::utf8),
            cache_dir: Some(Self::utf8(&self.dir.path().join("cache"))),
            idle_timeout_ms: self.idle_timeout_ms.unwrap_or(defaults.idle_timeout_ms),
            ..defaults
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("switchyardd"),
            OsString::from("--log-format"),
            OsString::from("pretty"),
        ];
        Config::load_from_iter(args)
    }
}
