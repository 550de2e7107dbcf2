use std::env;

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Quiet period after the last handled URL before an idle exit, in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 2_000;

/// Directory name used beneath the platform cache root.
pub const CACHE_DIR_NAME: &str = "switchyard";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default idle interval in milliseconds.
pub const fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

/// Computes the per-user cache directory.
///
/// Falls back to the system temporary directory when the platform does not
/// expose a cache root or the root is not valid UTF-8.
pub fn default_cache_dir() -> Utf8PathBuf {
    let base = dirs::cache_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(fallback_base_directory);
    base.join(CACHE_DIR_NAME)
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
