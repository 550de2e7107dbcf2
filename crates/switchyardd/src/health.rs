//! Structured health reporting for dispatcher lifecycle events.

use std::sync::Arc;

use switchyard_config::Config;

use crate::bootstrap::BootstrapError;
use crate::dispatch::ReloadError;
use crate::engine::RuntimeConfigState;
use crate::evaluator::LaunchDescriptor;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked before the routing script is rebuilt.
    fn reload_starting(&self);

    /// Invoked after a new engine is installed, or cleared when no script
    /// exists.
    fn reload_succeeded(&self, state: Option<&RuntimeConfigState>);

    /// Invoked when a reload fails and the previous engine stays in place.
    fn reload_failed(&self, error: &ReloadError);

    /// Invoked once a URL has been routed.
    fn url_routed(&self, descriptor: &LaunchDescriptor);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn reload_starting(&self) {
        (**self).reload_starting();
    }

    fn reload_succeeded(&self, state: Option<&RuntimeConfigState>) {
        (**self).reload_succeeded(state);
    }

    fn reload_failed(&self, error: &ReloadError) {
        (**self).reload_failed(error);
    }

    fn url_routed(&self, descriptor: &LaunchDescriptor) {
        (**self).url_routed(descriptor);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting dispatcher bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            cache_dir = %config.cache_dir(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            dry_run = config.dry_run(),
            "dispatcher bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "dispatcher bootstrap failed"
        );
    }

    fn reload_starting(&self) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "reload_starting",
            "reloading routing script"
        );
    }

    fn reload_succeeded(&self, state: Option<&RuntimeConfigState>) {
        match state {
            Some(state) => tracing::info!(
                target: HEALTH_TARGET,
                event = "reload_succeeded",
                handlers = state.handlers,
                rewrites = state.rewrites,
                default_browser = %state.default_browser,
                "routing script loaded"
            ),
            None => tracing::info!(
                target: HEALTH_TARGET,
                event = "reload_succeeded",
                "no routing script; using the default browser"
            ),
        }
    }

    fn reload_failed(&self, error: &ReloadError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "reload_failed",
            error = %error,
            "routing script reload failed"
        );
    }

    fn url_routed(&self, descriptor: &LaunchDescriptor) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "url_routed",
            target_app = %descriptor.target,
            kind = %descriptor.kind,
            url = %descriptor.url,
            "url routed"
        );
    }
}
