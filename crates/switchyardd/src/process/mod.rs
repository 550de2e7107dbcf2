mod args;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use launch::{StartupError, run_dispatcher};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
