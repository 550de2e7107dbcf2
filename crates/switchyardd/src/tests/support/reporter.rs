//! Test double for [`HealthReporter`] that records structured events for assertions.
//!
//! The recorder captures bootstrap, reload and routing telemetry so behaviour
//! tests can validate observable events.

use std::sync::Mutex;

use switchyard_config::Config;

use crate::bootstrap::BootstrapError;
use crate::dispatch::ReloadError;
use crate::engine::RuntimeConfigState;
use crate::evaluator::LaunchDescriptor;
use crate::health::HealthReporter;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// A reload started.
    ReloadStarting,
    /// A reload finished; carries the handler count when a script loaded.
    ReloadSucceeded(Option<usize>),
    /// A reload failed with an error description.
    ReloadFailed(String),
    /// A URL was routed to the named target.
    UrlRouted(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn reload_starting(&self) {
        self.record(HealthEvent::ReloadStarting);
    }

    fn reload_succeeded(&self, state: Option<&RuntimeConfigState>) {
        self.record(HealthEvent::ReloadSucceeded(
            state.map(|state| state.handlers),
        ));
    }

    fn reload_failed(&self, error: &ReloadError) {
        self.record(HealthEvent::ReloadFailed(error.to_string()));
    }

    fn url_routed(&self, descriptor: &LaunchDescriptor) {
        self.record(HealthEvent::UrlRouted(descriptor.target.clone()));
    }
}
