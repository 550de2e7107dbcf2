//! Launching routed URLs through an `open`-style helper.

use std::ffi::OsString;
use std::io;
use std::process::{Command, ExitStatus};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::evaluator::{AppKind, LaunchDescriptor};

const LAUNCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");

/// Helper invoked by [`CommandLauncher`] unless overridden.
pub const DEFAULT_OPEN_PROGRAM: &str = "open";

/// Errors raised while launching a target.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The helper could not be spawned.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Helper program.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The helper exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        /// Helper program.
        program: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured standard error.
        stderr: String,
    },
}

/// Starts the application a URL was routed to.
pub trait Launcher: Send + Sync {
    /// Launches `descriptor`. Descriptors of kind `none` launch nothing.
    fn launch(&self, descriptor: &LaunchDescriptor) -> Result<(), LaunchError>;
}

impl<T> Launcher for Arc<T>
where
    T: Launcher + ?Sized,
{
    fn launch(&self, descriptor: &LaunchDescriptor) -> Result<(), LaunchError> {
        (**self).launch(descriptor)
    }
}

/// Launcher spawning an `open`-compatible helper.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: OsString,
    dry_run: bool,
}

impl CommandLauncher {
    /// Builds a launcher around [`DEFAULT_OPEN_PROGRAM`].
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self::with_program(DEFAULT_OPEN_PROGRAM, dry_run)
    }

    /// Builds a launcher around a specific helper.
    #[must_use]
    pub fn with_program(program: impl Into<OsString>, dry_run: bool) -> Self {
        Self {
            program: program.into(),
            dry_run,
        }
    }

    /// Helper arguments for `descriptor`.
    #[must_use]
    pub fn arguments(descriptor: &LaunchDescriptor) -> Vec<String> {
        let selector = match descriptor.kind {
            AppKind::BundleId => "-b",
            AppKind::AppName | AppKind::Path | AppKind::None => "-a",
        };
        let mut args = vec![selector.to_owned(), descriptor.target.clone()];
        if descriptor.open_in_background {
            args.push("-g".to_owned());
        }

        let has_profile = !descriptor.profile.is_empty();
        let has_custom_args = !descriptor.args.is_empty();
        if has_profile {
            args.push("-n".to_owned());
        }
        if has_profile || has_custom_args {
            args.push("--args".to_owned());
        }
        if has_profile {
            args.push(format!("--profile-directory={}", descriptor.profile));
        }
        if has_custom_args {
            args.extend(descriptor.args.iter().cloned());
        } else {
            args.push(descriptor.url.clone());
        }
        args
    }

    fn program_label(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, descriptor: &LaunchDescriptor) -> Result<(), LaunchError> {
        if descriptor.is_noop() {
            info!(
                target: LAUNCH_TARGET,
                url = %descriptor.url,
                "launch suppressed by routing script"
            );
            return Ok(());
        }

        let args = Self::arguments(descriptor);
        let program = self.program_label();
        if self.dry_run {
            info!(
                target: LAUNCH_TARGET,
                %program,
                ?args,
                "dry run; not launching"
            );
            return Ok(());
        }

        debug!(target: LAUNCH_TARGET, %program, ?args, "launching");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.stdout.is_empty() {
            debug!(
                target: LAUNCH_TARGET,
                stdout = %String::from_utf8_lossy(&output.stdout),
                "launcher output"
            );
        }
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        error!(
            target: LAUNCH_TARGET,
            %program,
            status = %output.status,
            %stderr,
            "launcher failed"
        );
        Err(LaunchError::Failed {
            program,
            status: output.status,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn descriptor(kind: AppKind) -> LaunchDescriptor {
        LaunchDescriptor {
            target: "Firefox".to_owned(),
            kind,
            open_in_background: false,
            profile: String::new(),
            args: Vec::new(),
            url: "https://example.com/".to_owned(),
        }
    }

    #[rstest]
    #[case::bundle(AppKind::BundleId, "-b")]
    #[case::name(AppKind::AppName, "-a")]
    #[case::path(AppKind::Path, "-a")]
    fn selector_follows_kind(#[case] kind: AppKind, #[case] flag: &str) {
        let args = CommandLauncher::arguments(&descriptor(kind));
        assert_eq!(args, [flag, "Firefox", "https://example.com/"]);
    }

    #[rstest]
    fn background_profile_and_url() {
        let mut launch = descriptor(AppKind::BundleId);
        launch.open_in_background = true;
        launch.profile = "Work".to_owned();
        assert_eq!(
            CommandLauncher::arguments(&launch),
            [
                "-b",
                "Firefox",
                "-g",
                "-n",
                "--args",
                "--profile-directory=Work",
                "https://example.com/",
            ]
        );
    }

    #[rstest]
    fn custom_args_replace_the_url() {
        let mut launch = descriptor(AppKind::AppName);
        launch.args = vec!["--new-window".to_owned(), "https://other/".to_owned()];
        assert_eq!(
            CommandLauncher::arguments(&launch),
            ["-a", "Firefox", "--args", "--new-window", "https://other/"]
        );
    }

    #[rstest]
    fn none_kind_never_spawns() {
        let launcher = CommandLauncher::with_program("/nonexistent/open", false);
        launcher
            .launch(&descriptor(AppKind::None))
            .expect("noop launch succeeds");
    }

    #[rstest]
    fn dry_run_never_spawns() {
        let launcher = CommandLauncher::with_program("/nonexistent/open", true);
        launcher
            .launch(&descriptor(AppKind::AppName))
            .expect("dry run succeeds");
    }

    #[rstest]
    fn missing_helper_is_a_spawn_error() {
        let launcher = CommandLauncher::with_program("/nonexistent/open", false);
        let error = launcher
            .launch(&descriptor(AppKind::AppName))
            .expect_err("spawn must fail");
        assert!(matches!(error, LaunchError::Spawn { .. }));
    }
}
