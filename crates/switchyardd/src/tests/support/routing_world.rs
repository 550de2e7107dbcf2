//! BDD test world driving an [`EventDispatcher`] with recording collaborators.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use crate::dispatch::{
    DispatcherServices, DispatcherSettings, Event, EventDispatcher, ExitReason,
};
use crate::engine::SystemHost;
use crate::evaluator::UrlRequest;
use crate::launcher::Launcher;
use crate::locator::ConfigLocator;
use crate::pipeline::{BuildPipeline, CacheHandle, ContentCache, lock, shared};
use crate::updates::{NoReleaseSource, UpdateChecker};
use crate::watcher::{DEBOUNCE, FileWatcher};

use super::launcher::RecordingLauncher;
use super::reporter::RecordingHealthReporter;
use super::ui::RecordingUi;

const VERSION: &str = "1.2.0";

/// Idle timeout used by dispatchers built in scenarios.
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(60);

/// Scenario world owning a dispatcher rooted at a temporary home directory.
pub struct RoutingWorld {
    home: TempDir,
    pub launcher: Arc<RecordingLauncher>,
    pub ui: Arc<RecordingUi>,
    pub reporter: Arc<RecordingHealthReporter>,
    cache: Option<CacheHandle>,
    dispatcher: Option<EventDispatcher>,
    watcher: Option<(FileWatcher, Receiver<Event>)>,
    exit: Option<ExitReason>,
}

impl RoutingWorld {
    /// Builds a world with an empty home directory and no dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            home: TempDir::new().expect("failed to create temporary home directory"),
            launcher: Arc::new(RecordingLauncher::default()),
            ui: Arc::new(RecordingUi::default()),
            reporter: Arc::new(RecordingHealthReporter::default()),
            cache: None,
            dispatcher: None,
            watcher: None,
            exit: None,
        }
    }

    /// Swaps in a UI that is never on screen. Call before building.
    pub fn use_headless_ui(&mut self) {
        self.ui = Arc::new(RecordingUi::headless());
    }

    /// Location the locator checks first.
    #[must_use]
    pub fn script_path(&self) -> PathBuf {
        self.home.path().join(".switchyard.rhai")
    }

    /// Where routed requests are logged.
    #[must_use]
    pub fn request_log_path(&self) -> PathBuf {
        self.home.path().join("cache").join("requests.jsonl")
    }

    /// Writes the routing script.
    pub fn write_script(&self, contents: &str) {
        fs::write(self.script_path(), contents).expect("failed to write routing script");
    }

    /// Builds the dispatcher without running its start-up reload.
    pub fn build(&mut self) {
        let launcher = self.launcher.clone();
        self.build_with_launcher(launcher);
    }

    /// Builds the dispatcher around a different launcher.
    pub fn build_with_launcher(&mut self, launcher: Arc<dyn Launcher>) {
        let root = self.home.path().join("cache");
        let cache = shared(ContentCache::open(&root, VERSION));
        self.cache = Some(cache.clone());
        let pipeline = BuildPipeline::new(&root, root.join("transform"), VERSION, cache);
        let locator = self.locator();
        let services = DispatcherServices {
            launcher,
            ui: self.ui.clone(),
            updates: UpdateChecker::new(
                root.join("update_check.json"),
                VERSION,
                Arc::new(NoReleaseSource),
            ),
            reporter: self.reporter.clone(),
            host: Arc::new(SystemHost),
        };
        let settings = DispatcherSettings::new(IDLE_TIMEOUT, self.request_log_path(), VERSION);
        self.dispatcher = Some(EventDispatcher::new(locator, pipeline, settings, services));
    }

    fn locator(&self) -> ConfigLocator {
        ConfigLocator::with_home(None, Some(self.home.path().to_path_buf()))
    }

    /// Starts the system file watcher over the dispatcher's candidates.
    pub fn watch(&mut self) {
        let cache = self
            .cache
            .clone()
            .expect("dispatcher must be built before watching");
        let (events, receiver) = mpsc::channel();
        let watcher = FileWatcher::spawn(self.locator().candidates(), cache, events)
            .expect("failed to start file watcher");
        // Let the watch thread register its directories before files change.
        thread::sleep(Duration::from_millis(100));
        self.watcher = Some((watcher, receiver));
    }

    /// Waits for the watcher's next event and applies it to the dispatcher.
    pub fn deliver_watcher_event(&mut self) -> Option<Event> {
        let (_, receiver) = self
            .watcher
            .as_ref()
            .expect("watcher must be started first");
        let event = receiver.recv_timeout(DEBOUNCE * 6).ok()?;
        self.send(event.clone());
        Some(event)
    }

    /// Builds and starts the dispatcher.
    pub fn start(&mut self) {
        self.build();
        self.dispatcher_mut().start();
    }

    /// Applies one event, recording an exit reason if the loop would end.
    pub fn send(&mut self, event: Event) {
        if let Some(reason) = self.dispatcher_mut().handle(event) {
            self.exit = Some(reason);
        }
    }

    /// Rewrites the script and delivers the change the way the file watcher
    /// does: cache record dropped first, then [`Event::ConfigChanged`].
    pub fn change_script(&mut self, contents: &str) {
        self.write_script(contents);
        if let Some(cache) = &self.cache {
            lock(cache).invalidate();
        }
        self.send(Event::ConfigChanged);
    }

    /// Routes `url`.
    pub fn route(&mut self, url: &str) {
        self.send(Event::UrlRequested(UrlRequest::new(url)));
    }

    /// Runs the dispatcher loop with no incoming events until it exits.
    pub fn run_until_exit(&mut self) {
        let dispatcher = self
            .dispatcher
            .take()
            .expect("dispatcher must be built before running");
        let (events, receiver) = mpsc::channel::<Event>();
        let reason = dispatcher.run(&receiver);
        drop(events);
        self.exit = Some(reason);
    }

    /// The running dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        self.dispatcher
            .as_ref()
            .expect("dispatcher must be started first")
    }

    /// The running dispatcher, mutably.
    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        self.dispatcher
            .as_mut()
            .expect("dispatcher must be started first")
    }

    /// Exit reason recorded by the last event or loop run.
    #[must_use]
    pub fn exit(&self) -> Option<ExitReason> {
        self.exit
    }
}

impl Default for RoutingWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Routing world fixture.
#[must_use]
pub fn routing_world() -> RefCell<RoutingWorld> {
    RefCell::new(RoutingWorld::new())
}
