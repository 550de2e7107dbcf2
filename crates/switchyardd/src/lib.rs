//! Runtime for the switchyard URL dispatcher.
//!
//! The dispatcher receives URLs and decides which application opens each one
//! by evaluating a user-supplied Rhai script. The script lives at a well-known
//! location (or the path given with `--config`) and is watched for changes;
//! each change runs it through the build pipeline (legacy syntax transform,
//! import bundling and a version-scoped content cache) before it is loaded
//! into a fresh [`engine::ScriptEngine`].
//!
//! All mutable state is owned by a single [`dispatch::EventDispatcher`] that
//! consumes events from the file watcher, the signal listener, the command
//! line and the UI over one channel. A failed reload keeps the previous
//! engine; with no engine at all URLs open in the default browser.
//!
//! Bootstrap mirrors the rest of the runtime: configuration comes from
//! [`switchyard_config`], structured telemetry is installed once, and health
//! hooks report each stage so failures are easy to diagnose.

mod bootstrap;
pub mod dispatch;
pub mod engine;
pub mod evaluator;
mod health;
pub mod launcher;
pub mod locator;
pub mod pipeline;
mod process;
pub mod requests;
pub mod scheme;
pub mod telemetry;
pub mod ui;
pub mod updates;
pub mod version;
pub mod watcher;

pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{Event, EventDispatcher, ExitReason, ReloadError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    ShutdownError, ShutdownSignal, StartupError, SystemShutdownSignal, run_dispatcher,
};
pub use telemetry::{LogSettings, TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
