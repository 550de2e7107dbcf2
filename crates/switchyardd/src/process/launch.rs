//! Wires the dispatcher and its background producers together.

use std::env;
use std::ffi::OsString;
use std::io;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::StructuredHealthReporter;
use crate::bootstrap::{BootstrapError, ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::{DispatcherServices, DispatcherSettings, Event, EventDispatcher, ExitReason};
use crate::engine::SystemHost;
use crate::evaluator::UrlRequest;
use crate::health::HealthReporter;
use crate::launcher::{CommandLauncher, Launcher};
use crate::locator::ConfigLocator;
use crate::pipeline::{BuildPipeline, ContentCache, shared};
use crate::ui::{LogUi, QueuedUi, StreamSurface, UiBridge, forward_inbound};
use crate::updates::{NoReleaseSource, ReleaseSource, UpdateChecker};
use crate::version;
use crate::watcher::FileWatcher;

use super::PROCESS_TARGET;
use super::args::split_config_arguments;
use super::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

/// Errors that prevent the dispatcher from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Signal handlers could not be installed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The signal listener thread could not be spawned.
    #[error("failed to spawn signal listener: {source}")]
    SignalThread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The UI input reader thread could not be spawned.
    #[error("failed to spawn ui reader: {source}")]
    UiThread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Process-level collaborators.
pub(crate) struct ProcessControl<S> {
    pub(crate) shutdown: S,
    pub(crate) urls: Vec<String>,
}

/// Service dependencies required to construct the dispatcher.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) launcher: Option<Arc<dyn Launcher>>,
    pub(crate) ui: Option<Arc<dyn UiBridge>>,
    pub(crate) releases: Arc<dyn ReleaseSource>,
}

/// Collaborators required to run the dispatcher.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) process: ProcessControl<S>,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the dispatcher using the production collaborators.
///
/// Leading configuration flags are handed to the configuration loader; the
/// remaining arguments are routed as URLs once the script has loaded.
pub fn run_dispatcher() -> Result<ExitReason, StartupError> {
    let args: Vec<OsString> = env::args_os().collect();
    let split = split_config_arguments(&args);
    let urls = split.urls(&args);
    let plan = LaunchPlan {
        process: ProcessControl {
            shutdown: SystemShutdownSignal::install()?,
            urls,
        },
        services: ServiceDeps {
            loader: SystemConfigLoader::new(split.config_arguments),
            reporter: Arc::new(StructuredHealthReporter::new()),
            launcher: None,
            ui: None,
            releases: Arc::new(NoReleaseSource),
        },
    };
    run_dispatcher_with(plan)
}

/// Runs the dispatcher with injected collaborators.
pub(crate) fn run_dispatcher_with<L, S>(plan: LaunchPlan<L, S>) -> Result<ExitReason, StartupError>
where
    L: ConfigLoader,
    S: ShutdownSignal + 'static,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl { shutdown, urls } = process;
    let ServiceDeps {
        loader,
        reporter,
        launcher,
        ui,
        releases,
    } = services;

    let bootstrapped = bootstrap_with(&loader, Arc::clone(&reporter))?;
    let config = bootstrapped.config();
    let paths = bootstrapped.paths();
    let version = version::current();
    info!(
        target: PROCESS_TARGET,
        version = %version,
        dry_run = config.dry_run(),
        "starting dispatcher runtime"
    );

    let cache = shared(ContentCache::open(paths.root(), version.as_str()));
    let locator = ConfigLocator::new(
        config
            .script_override()
            .map(|path| path.as_std_path().to_path_buf()),
    );
    let pipeline = BuildPipeline::new(
        paths.root(),
        paths.transform_dir(),
        &version,
        Arc::clone(&cache),
    );

    let (events, receiver) = mpsc::channel();
    spawn_signal_listener(shutdown, events.clone())?;
    let ui = match ui {
        Some(ui) => ui,
        None => default_ui(config.window(), &events)?,
    };
    let watcher = match FileWatcher::spawn(locator.candidates(), cache, events.clone()) {
        Ok(watcher) => Some(watcher),
        Err(error) => {
            error!(
                target: PROCESS_TARGET,
                %error,
                "file watcher unavailable; configuration changes need a restart"
            );
            None
        }
    };

    if config.window() {
        events.send(Event::ShowUiRequested(true)).ok();
    }
    for url in urls {
        events.send(Event::UrlRequested(UrlRequest::new(url))).ok();
    }
    drop(events);

    let launcher = launcher
        .unwrap_or_else(|| Arc::new(CommandLauncher::new(config.dry_run())) as Arc<dyn Launcher>);
    let services = DispatcherServices {
        launcher,
        ui,
        updates: UpdateChecker::new(paths.update_record(), version.as_str(), releases),
        reporter,
        host: Arc::new(SystemHost),
    };
    let settings = DispatcherSettings::new(config.idle_timeout(), paths.request_log(), version);
    let dispatcher = EventDispatcher::new(locator, pipeline, settings, services);

    let reason = dispatcher.run(&receiver);
    if let Some(watcher) = watcher
        && let Err(error) = watcher.stop()
    {
        warn!(target: PROCESS_TARGET, %error, "file watcher did not stop cleanly");
    }
    info!(
        target: PROCESS_TARGET,
        %reason,
        "shutdown sequence completed"
    );
    Ok(reason)
}

/// Builds the UI for a production run.
///
/// With `--window` the surface is a JSON-lines front end on stdio, read by a
/// background thread. Otherwise messages only reach the log.
fn default_ui(window: bool, events: &Sender<Event>) -> Result<Arc<dyn UiBridge>, StartupError> {
    if !window {
        let ui = QueuedUi::new(LogUi);
        ui.mark_ready();
        return Ok(Arc::new(ui));
    }
    let ui = Arc::new(QueuedUi::new(StreamSurface::new(io::stdout())));
    let reader = Arc::clone(&ui);
    let events = events.clone();
    thread::Builder::new()
        .name("switchyard-ui".to_owned())
        .spawn(move || forward_inbound(io::stdin().lock(), &reader, &events))
        .map_err(|source| StartupError::UiThread { source })?;
    Ok(ui as Arc<dyn UiBridge>)
}

fn spawn_signal_listener<S>(shutdown: S, events: Sender<Event>) -> Result<(), StartupError>
where
    S: ShutdownSignal + 'static,
{
    thread::Builder::new()
        .name("switchyard-signals".to_owned())
        .spawn(move || {
            if let Err(error) = shutdown.wait() {
                error!(target: PROCESS_TARGET, %error, "signal listener failed");
            }
            events.send(Event::Shutdown).ok();
        })
        .map(drop)
        .map_err(|source| StartupError::SignalThread { source })
}
