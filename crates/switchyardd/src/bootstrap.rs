//! Dispatcher bootstrap orchestration.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use switchyard_config::{CachePaths, CachePathsError, Config};

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the dispatcher configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that parses the configuration flags split from the command line.
#[derive(Debug, Default, Clone)]
pub struct SystemConfigLoader {
    args: Vec<OsString>,
}

impl SystemConfigLoader {
    /// Builds a loader over `args`, program name first.
    #[must_use]
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }
}

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        if self.args.is_empty() {
            return Config::load();
        }
        Config::load_from_iter(self.args.iter().cloned())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The cache layout could not be created.
    #[error("failed to prepare cache directory: {source}")]
    Cache {
        /// Filesystem error reported while creating the layout.
        #[source]
        source: CachePathsError,
    },
}

/// Result of a successful bootstrap.
pub struct Bootstrapped {
    config: Config,
    paths: CachePaths,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Bootstrapped {
    /// Resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cache layout.
    #[must_use]
    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// Telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Health reporter passed to bootstrap.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }
}

/// Loads configuration, installs telemetry and prepares the cache layout.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Bootstrapped, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let paths = match CachePaths::from_config(&config) {
        Ok(paths) => paths,
        Err(source) => {
            let error = BootstrapError::Cache { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    reporter.bootstrap_succeeded(&config);
    Ok(Bootstrapped {
        config,
        paths,
        telemetry,
        reporter,
    })
}
