//! Running build version.

use std::env;
use std::fs;
use std::path::Path;

use tracing::debug;

const VERSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::version");

/// Names a build-info file whose first line overrides the compiled version.
pub const BUILD_INFO_ENV_VAR: &str = "SWITCHYARD_BUILD_INFO";

/// Version compiled into the binary.
pub const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the running version, preferring the build-info file when set.
#[must_use]
pub fn current() -> String {
    env::var_os(BUILD_INFO_ENV_VAR)
        .and_then(|path| from_build_info(Path::new(&path)))
        .unwrap_or_else(|| PACKAGE_VERSION.to_owned())
}

/// Reads the first non-blank line of a build-info file.
pub(crate) fn from_build_info(path: &Path) -> Option<String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            debug!(
                target: VERSION_TARGET,
                path = %path.display(),
                %error,
                "build info unreadable"
            );
            return None;
        }
    };
    contents
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
}
