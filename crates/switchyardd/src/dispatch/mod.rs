//! Single-threaded event loop owning the loaded configuration.
//!
//! Every mutation of dispatcher state happens inside [`EventDispatcher::handle`].
//! Background producers (the file watcher, signal listener, URL feeder and UI
//! bridge) only ever send [`Event`]s over one channel.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

mod lifecycle;

pub use lifecycle::LifecycleController;

use crate::engine::{
    API_SOURCE, ConfigOptions, HostCapabilities, LoadError, RuntimeConfigState, ScriptEngine,
};
use crate::evaluator::{self, EvaluationError, LaunchDescriptor, UrlRequest};
use crate::health::HealthReporter;
use crate::launcher::Launcher;
use crate::locator::{ConfigLocator, LocateError};
use crate::pipeline::{BuildPipeline, PipelineError};
use crate::requests::RequestLog;
use crate::scheme;
use crate::ui::{ConfigMessage, TestUrlResult, UiBridge, UiMessage};
use crate::updates::{UPDATE_INTERVAL, UpdateChecker};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Inputs consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A URL needs routing.
    UrlRequested(UrlRequest),
    /// The routing script may have changed.
    ConfigChanged,
    /// The UI should be shown.
    ShowUiRequested(bool),
    /// The UI was closed.
    UiClosed,
    /// The idle deadline elapsed.
    IdleTimeout,
    /// The periodic update deadline elapsed.
    PeriodicUpdateTick,
    /// The UI asked how a URL would be routed.
    TestUrl {
        /// URL to evaluate.
        url: String,
    },
    /// The file watcher stopped; hot reload is unavailable.
    WatcherClosed(String),
    /// Termination was requested.
    Shutdown,
}

/// Why the dispatcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Idle deadline with `keep_running` disabled.
    Idle,
    /// UI closed with `keep_running` disabled.
    UiClosed,
    /// A shutdown was requested.
    Shutdown,
    /// Every event producer went away.
    Disconnected,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::UiClosed => "ui_closed",
            Self::Shutdown => "shutdown",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Failure to refresh the loaded configuration.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The script could not be located.
    #[error(transparent)]
    Locate(#[from] LocateError),
    /// Transforming or bundling failed.
    #[error(transparent)]
    Build(#[from] PipelineError),
    /// The engine rejected the bundle.
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Collaborators the dispatcher delegates side effects to.
#[derive(Clone)]
pub struct DispatcherServices {
    /// Starts routed applications.
    pub launcher: Arc<dyn Launcher>,
    /// Presents state to the user.
    pub ui: Arc<dyn UiBridge>,
    /// Polls for releases.
    pub updates: UpdateChecker,
    /// Observes reloads and routed URLs.
    pub reporter: Arc<dyn HealthReporter>,
    /// Capabilities exposed to scripts.
    pub host: Arc<dyn HostCapabilities>,
}

/// Tunables for the dispatcher loop.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Idle interval before exiting when `keep_running` is disabled.
    pub idle_timeout: Duration,
    /// Interval between periodic update checks.
    pub update_interval: Duration,
    /// Request log location.
    pub request_log: PathBuf,
    /// Running version reported to the UI.
    pub version: String,
}

impl DispatcherSettings {
    /// Settings with the default update interval.
    pub fn new(
        idle_timeout: Duration,
        request_log: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            idle_timeout,
            update_interval: UPDATE_INTERVAL,
            request_log: request_log.into(),
            version: version.into(),
        }
    }
}

/// Owner of the current engine and every piece of mutable runtime state.
pub struct EventDispatcher {
    locator: ConfigLocator,
    pipeline: BuildPipeline,
    services: DispatcherServices,
    request_log: RequestLog,
    version: String,
    engine: Option<ScriptEngine>,
    config_path: Option<PathBuf>,
    last_error: Option<String>,
    options: ConfigOptions,
    lifecycle: LifecycleController,
    update_interval: Duration,
    update_deadline: Instant,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("engine", &self.engine)
            .field("config_path", &self.config_path)
            .field("last_error", &self.last_error)
            .field("options", &self.options)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

struct Loaded {
    engine: ScriptEngine,
    path: PathBuf,
}

impl EventDispatcher {
    /// Builds a dispatcher with no engine loaded yet.
    pub fn new(
        locator: ConfigLocator,
        pipeline: BuildPipeline,
        settings: DispatcherSettings,
        services: DispatcherServices,
    ) -> Self {
        let now = Instant::now();
        Self {
            locator,
            pipeline,
            services,
            request_log: RequestLog::new(settings.request_log),
            version: settings.version,
            engine: None,
            config_path: None,
            last_error: None,
            options: ConfigOptions::default(),
            lifecycle: LifecycleController::new(settings.idle_timeout, now),
            update_interval: settings.update_interval,
            update_deadline: now + settings.update_interval,
        }
    }

    /// Currently installed engine.
    #[must_use]
    pub fn engine(&self) -> Option<&ScriptEngine> {
        self.engine.as_ref()
    }

    /// Message of the most recent failed reload, cleared by a success.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Options read after the last reload.
    #[must_use]
    pub const fn options(&self) -> ConfigOptions {
        self.options
    }

    /// Idle-exit state.
    #[must_use]
    pub const fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Loads the initial configuration and announces the running version.
    pub fn start(&mut self) {
        info!(
            target: DISPATCH_TARGET,
            version = %self.version,
            "dispatcher starting"
        );
        self.services
            .ui
            .send(UiMessage::Version(self.version.clone()));
        self.reload();
        self.check_updates();
    }

    /// Runs until an exit condition is reached.
    pub fn run(mut self, events: &Receiver<Event>) -> ExitReason {
        self.start();
        info!(target: DISPATCH_TARGET, "listening for events");
        loop {
            let wait = self
                .next_deadline()
                .saturating_duration_since(Instant::now());
            let event = match events.recv_timeout(wait) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => match self.due_event(Instant::now()) {
                    Some(event) => event,
                    None => continue,
                },
                Err(RecvTimeoutError::Disconnected) => {
                    info!(target: DISPATCH_TARGET, "event producers gone");
                    return ExitReason::Disconnected;
                }
            };
            if let Some(reason) = self.handle(event) {
                info!(target: DISPATCH_TARGET, %reason, "dispatcher exiting");
                return reason;
            }
        }
    }

    /// Applies one event. Returns the exit reason when the loop should end.
    pub fn handle(&mut self, event: Event) -> Option<ExitReason> {
        match event {
            Event::UrlRequested(request) => {
                self.route_url(request);
                None
            }
            Event::ConfigChanged => {
                self.reload();
                None
            }
            Event::ShowUiRequested(show) => {
                if show {
                    self.show_ui();
                }
                None
            }
            Event::UiClosed => self.ui_closed(),
            Event::IdleTimeout => {
                let reason = self.lifecycle.on_timeout(Instant::now())?;
                self.before_exit();
                Some(reason)
            }
            Event::PeriodicUpdateTick => {
                self.check_updates();
                self.update_deadline = Instant::now() + self.update_interval;
                None
            }
            Event::TestUrl { url } => {
                self.test_url(url);
                None
            }
            Event::WatcherClosed(reason) => {
                error!(
                    target: DISPATCH_TARGET,
                    %reason,
                    "file watcher closed; configuration changes will not be picked up"
                );
                None
            }
            Event::Shutdown => Some(ExitReason::Shutdown),
        }
    }

    fn next_deadline(&self) -> Instant {
        self.lifecycle
            .deadline()
            .map_or(self.update_deadline, |idle| idle.min(self.update_deadline))
    }

    fn due_event(&self, now: Instant) -> Option<Event> {
        if self.lifecycle.deadline().is_some_and(|deadline| now >= deadline) {
            return Some(Event::IdleTimeout);
        }
        (now >= self.update_deadline).then_some(Event::PeriodicUpdateTick)
    }

    fn route_url(&mut self, request: UrlRequest) {
        let started = Instant::now();
        let request = UrlRequest {
            url: scheme::resolve(&request.url),
            ..request
        };
        info!(target: DISPATCH_TARGET, url = %request.url, "url received");

        let (descriptor, failure) = evaluator::route(self.engine.as_ref(), &request);
        match &failure {
            Some(EvaluationError::NoConfiguration) => warn!(
                target: DISPATCH_TARGET,
                "no configuration available; using the default browser"
            ),
            Some(error) => {
                error!(target: DISPATCH_TARGET, %error, "failed evaluating url");
                self.last_error = Some(error.to_string());
                self.show_ui();
            }
            None => {}
        }

        if self.options.log_requests {
            let message = failure.as_ref().map(ToString::to_string);
            if let Err(error) = self
                .request_log
                .append(&request, &descriptor, message.as_deref())
            {
                warn!(target: DISPATCH_TARGET, %error, "failed to log request");
            }
        }

        self.services.reporter.url_routed(&descriptor);
        self.launch(&descriptor);
        debug!(
            target: DISPATCH_TARGET,
            elapsed = ?started.elapsed(),
            "url handled"
        );
        self.lifecycle.record_activity(Instant::now());
    }

    fn launch(&self, descriptor: &LaunchDescriptor) {
        if let Err(error) = self.services.launcher.launch(descriptor) {
            error!(
                target: DISPATCH_TARGET,
                %error,
                target_app = %descriptor.target,
                "failed to start application"
            );
        }
    }

    fn reload(&mut self) {
        let started = Instant::now();
        self.services.reporter.reload_starting();
        match self.rebuild() {
            Ok(Some(Loaded { engine, path })) => {
                let state = self.report_state(&engine);
                self.services.reporter.reload_succeeded(state.as_ref());
                self.engine = Some(engine);
                self.config_path = Some(path);
                self.last_error = None;
            }
            Ok(None) => {
                self.services.reporter.reload_succeeded(None);
                self.engine = None;
                self.config_path = None;
                self.last_error = None;
            }
            Err(error) => {
                self.services.reporter.reload_failed(&error);
                if matches!(error, ReloadError::Locate(_)) {
                    self.engine = None;
                    self.config_path = None;
                }
                self.last_error = Some(error.to_string());
                self.show_ui();
            }
        }
        self.options = ConfigOptions::read(self.engine.as_ref());
        self.lifecycle
            .apply_policy(self.options.keep_running, Instant::now());
        if self.options.log_requests {
            warn!(
                target: DISPATCH_TARGET,
                path = %self.request_log.path().display(),
                "logging requests to disk; entries may include sensitive urls"
            );
        }
        self.send_config();
        debug!(
            target: DISPATCH_TARGET,
            elapsed = ?started.elapsed(),
            "configuration refresh complete"
        );
    }

    fn rebuild(&self) -> Result<Option<Loaded>, ReloadError> {
        let descriptor = match self.locator.resolve() {
            Ok(descriptor) => descriptor,
            Err(error) if error.is_absent() => {
                info!(target: DISPATCH_TARGET, %error, "no routing script found");
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        let compiled = self.pipeline.build(&descriptor)?;
        let engine = ScriptEngine::load(
            API_SOURCE,
            Some(&compiled),
            Arc::clone(&self.services.host),
        )?;
        Ok(Some(Loaded {
            engine,
            path: descriptor.path,
        }))
    }

    fn report_state(&self, engine: &ScriptEngine) -> Option<RuntimeConfigState> {
        match engine.state() {
            Ok(state) => Some(state),
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "failed to read configuration state");
                None
            }
        }
    }

    fn send_config(&self) {
        let state = self.engine.as_ref().and_then(|engine| engine.state().ok());
        self.services.ui.send(UiMessage::Config(ConfigMessage {
            config_path: self
                .config_path
                .as_ref()
                .map(|path| path.display().to_string()),
            state,
            options: self.options,
            error: self.last_error.clone(),
        }));
    }

    fn show_ui(&mut self) {
        if self.lifecycle.ui_visible() {
            return;
        }
        debug!(target: DISPATCH_TARGET, "showing ui");
        if self.services.ui.set_visible(true) {
            self.lifecycle.ui_shown();
        }
        self.services
            .ui
            .send(UiMessage::Version(self.version.clone()));
        if let Some(error) = &self.last_error {
            self.services.ui.send(UiMessage::Log(error.clone()));
        }
    }

    fn ui_closed(&mut self) -> Option<ExitReason> {
        self.lifecycle.ui_hidden(Instant::now());
        if self.lifecycle.keep_running() {
            debug!(target: DISPATCH_TARGET, "ui closed");
            return None;
        }
        self.before_exit();
        Some(ExitReason::UiClosed)
    }

    fn test_url(&self, url: String) {
        debug!(target: DISPATCH_TARGET, %url, "testing url");
        let request = UrlRequest::new(url);
        let result = match evaluator::evaluate(self.engine.as_ref(), &request) {
            Ok(descriptor) => TestUrlResult::from(&descriptor),
            Err(error) => TestUrlResult::Failed {
                error: error.to_string(),
            },
        };
        self.services.ui.send(UiMessage::TestUrlResult(result));
    }

    fn check_updates(&self) {
        let notice = self.services.updates.check(self.options.check_for_updates);
        self.services.ui.send(UiMessage::UpdateInfo(notice));
    }

    fn before_exit(&self) {
        if self.options.check_for_updates {
            self.check_updates();
        }
    }
}
