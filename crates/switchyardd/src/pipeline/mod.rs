//! Build pipeline turning a routing script into a loadable bundle.
//!
//! A build consults the [`ContentCache`] first. On a miss the source is read,
//! downgraded by the [`Transformer`] when it uses the legacy dialect, bundled
//! by the [`Bundler`] and recorded in the cache.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

mod bundle;
mod cache;
mod files;
mod lexer;
mod transform;

pub use bundle::{
    ArtifactError, BuildError, BundleArtifact, BundleModule, Bundler, CompiledConfig,
    DEFAULT_NAMESPACE,
};
pub use cache::{
    CacheEntry, CacheHandle, CacheIoError, CacheLookup, ContentCache, MissReason, lock, shared,
};
pub(crate) use files::atomic_write;
pub use transform::{
    TRANSFORM_RETENTION, TransformError, Transformed, Transformer, needs_transform, transform,
};

use crate::locator::ConfigDescriptor;

pub(crate) const PIPELINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pipeline");

/// Errors raised while building a bundle.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The routing script could not be read.
    #[error("failed to read '{}': {source}", .path.display())]
    Read {
        /// Script path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the transformed script failed.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// Bundling reported diagnostics.
    #[error(transparent)]
    Bundle(#[from] BuildError),
}

/// Cache-aware transform and bundle sequence.
#[derive(Debug, Clone)]
pub struct BuildPipeline {
    transformer: Transformer,
    bundler: Bundler,
    cache: CacheHandle,
    namespace: String,
}

impl BuildPipeline {
    /// Creates a pipeline writing into the cache layout for `version`.
    pub fn new(
        root: impl Into<PathBuf>,
        transform_dir: impl Into<PathBuf>,
        version: &str,
        cache: CacheHandle,
    ) -> Self {
        Self {
            transformer: Transformer::new(transform_dir, version),
            bundler: Bundler::new(root, version),
            cache,
            namespace: DEFAULT_NAMESPACE.to_owned(),
        }
    }

    /// Shared cache handle.
    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// Produces a bundle for `descriptor`, reusing a cached one when current.
    pub fn build(&self, descriptor: &ConfigDescriptor) -> Result<CompiledConfig, PipelineError> {
        let origin = descriptor.path.as_path();
        let lookup = lock(&self.cache).lookup(origin);
        match lookup {
            CacheLookup::Hit(bundle_path) => {
                debug!(
                    target: PIPELINE_TARGET,
                    bundle = %bundle_path.display(),
                    "cache hit"
                );
                return Ok(CompiledConfig {
                    bundle_path,
                    namespace: self.namespace.clone(),
                });
            }
            CacheLookup::Miss(reason) => {
                debug!(target: PIPELINE_TARGET, reason = ?reason, "cache miss");
            }
        }

        let source = fs::read_to_string(origin).map_err(|source| PipelineError::Read {
            path: origin.to_path_buf(),
            source,
        })?;
        let entry = if needs_transform(&source) {
            let transformed = self.transformer.apply(&source)?;
            info!(
                target: PIPELINE_TARGET,
                key = %transformed.key,
                reused = transformed.reused,
                "legacy syntax detected"
            );
            transformed.path
        } else {
            origin.to_path_buf()
        };

        let compiled = self.bundler.bundle(&entry, origin, &self.namespace)?;
        if let Err(error) = lock(&self.cache).store(origin, &compiled.bundle_path) {
            warn!(target: PIPELINE_TARGET, error = %error, "failed to record build");
        }
        Ok(compiled)
    }
}
