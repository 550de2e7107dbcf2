//! Layered configuration for the switchyard URL dispatcher.
//!
//! Settings resolve in the usual ortho-config order: built-in defaults, then a
//! TOML file discovered through `--config-path` or `SWITCHYARD_CONFIG_PATH`,
//! then `SWITCHYARD_*` environment variables, then command-line flags.
//!
//! This crate only covers how the dispatcher itself runs. Routing rules live in
//! the user's script, whose location can be pinned with `--config`.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod cache;
mod defaults;
mod logging;

pub use cache::{CachePaths, CachePathsError};
pub use defaults::{
    CACHE_DIR_NAME, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_LOG_FILTER, default_cache_dir,
    default_idle_timeout_ms, default_log_filter, default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime settings for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "SWITCHYARD")]
pub struct Config {
    /// Explicit routing script, bypassing candidate discovery.
    #[serde(default)]
    pub config: Option<Utf8PathBuf>,
    /// Attaches a JSON-lines UI front end on stdio and shows it at startup.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub window: bool,
    /// Evaluates and logs launches without spawning anything.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub dry_run: bool,
    /// Tracing filter expression.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Tracing output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Overrides the per-user cache directory.
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,
    /// Idle interval before exiting when the script disables `keep_running`.
    #[serde(default = "default_idle_timeout_ms")]
    #[ortho_config(default = default_idle_timeout_ms())]
    pub idle_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config: None,
            window: false,
            dry_run: false,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            cache_dir: None,
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Config {
    /// Routing script override, if any.
    pub fn script_override(&self) -> Option<&Utf8Path> {
        self.config.as_deref()
    }

    /// Whether the UI surface should be shown at startup.
    pub const fn window(&self) -> bool {
        self.window
    }

    /// Whether launches are suppressed.
    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Tracing filter expression.
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Tracing output format.
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Effective cache directory.
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Idle interval as a [`Duration`].
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
