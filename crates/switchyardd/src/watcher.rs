//! Filesystem watch on the routing script.
//!
//! While no script exists the watcher observes the parent directories of every
//! candidate path. Once a candidate appears it switches to watching that file
//! alone and falls back to the directories when the file is removed. Bursts of
//! events are debounced so each logical change produces one
//! [`Event::ConfigChanged`].

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dispatch::Event;
use crate::pipeline::{CacheHandle, lock};

const WATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::watcher");

/// Quiet period that must elapse after the last event before reloading.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// What the watcher is currently observing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No script exists; candidate directories are watched.
    Unresolved,
    /// A script exists and is watched directly.
    Resolved,
}

impl WatchState {
    const fn encode(self) -> u8 {
        match self {
            Self::Unresolved => 0,
            Self::Resolved => 1,
        }
    }

    const fn decode(value: u8) -> Self {
        match value {
            1 => Self::Resolved,
            _ => Self::Unresolved,
        }
    }
}

/// Errors raised by the file watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The notification backend could not be created.
    #[error("failed to initialise file watcher: {source}")]
    Backend {
        /// Backend error.
        #[source]
        source: notify::Error,
    },
    /// The watch thread could not be spawned.
    #[error("failed to spawn watch thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The notification channel disconnected.
    #[error("file watcher channel closed")]
    Closed,
    /// The watch thread panicked.
    #[error("watch thread panicked")]
    Panicked,
}

/// Messages consumed by the watch thread.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Raw backend notification.
    Fs(notify::Result<notify::Event>),
    /// Request to end the thread.
    Stop,
}

/// Minimal watch surface over the notification backend.
pub(crate) trait PathWatch: Send {
    /// Starts watching `path` non-recursively.
    fn watch(&mut self, path: &Path) -> notify::Result<()>;

    /// Stops watching `path`.
    fn unwatch(&mut self, path: &Path) -> notify::Result<()>;
}

impl PathWatch for RecommendedWatcher {
    fn watch(&mut self, path: &Path) -> notify::Result<()> {
        Watcher::watch(self, path, RecursiveMode::NonRecursive)
    }

    fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        Watcher::unwatch(self, path)
    }
}

/// Inputs shared by every watch loop.
#[derive(Debug, Clone)]
pub(crate) struct WatchSettings {
    pub(crate) candidates: Vec<PathBuf>,
    pub(crate) cache: CacheHandle,
    pub(crate) events: Sender<Event>,
    pub(crate) debounce: Duration,
}

/// Handle to the background watch thread.
#[derive(Debug)]
pub struct FileWatcher {
    state: Arc<AtomicU8>,
    control: Sender<Signal>,
    thread: Option<JoinHandle<Result<(), WatchError>>>,
}

impl FileWatcher {
    /// Starts watching `candidates`, sending reload events to `events`.
    pub fn spawn(
        candidates: Vec<PathBuf>,
        cache: CacheHandle,
        events: Sender<Event>,
    ) -> Result<Self, WatchError> {
        let (control, signals) = mpsc::channel();
        let forward = control.clone();
        let backend = notify::recommended_watcher(move |result| {
            forward.send(Signal::Fs(result)).ok();
        })
        .map_err(|source| WatchError::Backend { source })?;
        let settings = WatchSettings {
            candidates,
            cache,
            events,
            debounce: DEBOUNCE,
        };
        Self::spawn_with(settings, backend, control, signals)
    }

    /// Starts the watch loop over an arbitrary backend.
    pub(crate) fn spawn_with<W>(
        settings: WatchSettings,
        backend: W,
        control: Sender<Signal>,
        signals: Receiver<Signal>,
    ) -> Result<Self, WatchError>
    where
        W: PathWatch + 'static,
    {
        let state = Arc::new(AtomicU8::new(WatchState::Unresolved.encode()));
        let mut watch = WatchLoop::new(settings, backend, Arc::clone(&state));
        let thread = thread::Builder::new()
            .name("switchyard-watch".to_owned())
            .spawn(move || {
                let result = watch.run(&signals);
                if let Err(error) = &result {
                    error!(target: WATCH_TARGET, %error, "file watcher stopped");
                    watch.notify(Event::WatcherClosed(error.to_string()));
                }
                result
            })
            .map_err(|source| WatchError::Spawn { source })?;
        Ok(Self {
            state,
            control,
            thread: Some(thread),
        })
    }

    /// Current watch state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        WatchState::decode(self.state.load(Ordering::Acquire))
    }

    /// Ends the watch thread and waits for it.
    pub fn stop(mut self) -> Result<(), WatchError> {
        self.control.send(Signal::Stop).ok();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| WatchError::Panicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.control.send(Signal::Stop).ok();
        }
    }
}

struct Pending {
    path: PathBuf,
    deadline: Instant,
}

struct WatchLoop<W> {
    settings: WatchSettings,
    backend: W,
    state: Arc<AtomicU8>,
    file: Option<PathBuf>,
    directories: Vec<PathBuf>,
    pending: Option<Pending>,
}

impl<W: PathWatch> WatchLoop<W> {
    fn new(settings: WatchSettings, backend: W, state: Arc<AtomicU8>) -> Self {
        Self {
            settings,
            backend,
            state,
            file: None,
            directories: Vec::new(),
            pending: None,
        }
    }

    fn run(&mut self, signals: &Receiver<Signal>) -> Result<(), WatchError> {
        let existing = self
            .settings
            .candidates
            .iter()
            .find(|path| path.is_file())
            .cloned();
        let resolved = existing.is_some_and(|path| self.watch_file(&path));
        if !resolved {
            self.arm_directories();
        }

        loop {
            let received = match &self.pending {
                Some(pending) => {
                    signals.recv_timeout(pending.deadline.saturating_duration_since(Instant::now()))
                }
                None => signals.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let keep_going = match received {
                Ok(Signal::Stop) => return Ok(()),
                Ok(Signal::Fs(Ok(event))) => self.observe(&event),
                Ok(Signal::Fs(Err(error))) => {
                    warn!(target: WATCH_TARGET, %error, "file watcher backend error");
                    true
                }
                Err(RecvTimeoutError::Timeout) => self.settle(),
                Err(RecvTimeoutError::Disconnected) => return Err(WatchError::Closed),
            };
            if !keep_going {
                debug!(target: WATCH_TARGET, "dispatcher gone; stopping file watcher");
                return Ok(());
            }
        }
    }

    /// Handles one backend event. Returns `false` once the dispatcher is gone.
    fn observe(&mut self, event: &notify::Event) -> bool {
        match self.file.clone() {
            None => {
                let qualifies = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
                let candidate = event
                    .paths
                    .iter()
                    .find(|path| self.settings.candidates.contains(path));
                if let Some(path) = candidate
                    && qualifies
                {
                    debug!(target: WATCH_TARGET, path = %path.display(), "candidate appeared");
                    self.arm_debounce(path.clone());
                }
                true
            }
            Some(file) => {
                if !event.paths.contains(&file) {
                    return true;
                }
                if is_removal(&event.kind) {
                    return self.file_removed(&file);
                }
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    self.arm_debounce(file);
                }
                true
            }
        }
    }

    fn file_removed(&mut self, file: &Path) -> bool {
        if file.is_file() {
            debug!(
                target: WATCH_TARGET,
                path = %file.display(),
                "script replaced in place"
            );
            self.backend.unwatch(file).ok();
            if let Err(error) = self.backend.watch(file) {
                warn!(target: WATCH_TARGET, path = %file.display(), %error, "failed to re-watch script");
            }
            self.arm_debounce(file.to_path_buf());
            return true;
        }

        info!(target: WATCH_TARGET, path = %file.display(), "routing script removed");
        self.pending = None;
        self.backend.unwatch(file).ok();
        self.file = None;
        self.set_state(WatchState::Unresolved);
        self.arm_directories();
        self.reload()
    }

    /// Fires once the debounce window has elapsed.
    fn settle(&mut self) -> bool {
        let Some(Pending { path, .. }) = self.pending.take() else {
            return true;
        };
        if self.file.is_none() {
            self.disarm_directories();
            if !self.watch_file(&path) {
                self.arm_directories();
                return true;
            }
            info!(target: WATCH_TARGET, path = %path.display(), "routing script created");
        } else {
            debug!(target: WATCH_TARGET, path = %path.display(), "routing script changed");
        }
        self.reload()
    }

    fn reload(&self) -> bool {
        lock(&self.settings.cache).invalidate();
        self.notify(Event::ConfigChanged)
    }

    fn notify(&self, event: Event) -> bool {
        self.settings.events.send(event).is_ok()
    }

    fn arm_debounce(&mut self, path: PathBuf) {
        self.pending = Some(Pending {
            path,
            deadline: Instant::now() + self.settings.debounce,
        });
    }

    fn watch_file(&mut self, path: &Path) -> bool {
        match self.backend.watch(path) {
            Ok(()) => {
                debug!(target: WATCH_TARGET, path = %path.display(), "watching routing script");
                self.file = Some(path.to_path_buf());
                self.set_state(WatchState::Resolved);
                true
            }
            Err(error) => {
                warn!(target: WATCH_TARGET, path = %path.display(), %error, "failed to watch routing script");
                false
            }
        }
    }

    fn arm_directories(&mut self) {
        let parents: BTreeSet<PathBuf> = self
            .settings
            .candidates
            .iter()
            .filter_map(|candidate| candidate.parent())
            .filter(|parent| parent.is_dir())
            .map(Path::to_path_buf)
            .collect();
        for directory in parents {
            if self.directories.contains(&directory) {
                continue;
            }
            match self.backend.watch(&directory) {
                Ok(()) => self.directories.push(directory),
                Err(error) => debug!(
                    target: WATCH_TARGET,
                    path = %directory.display(),
                    %error,
                    "failed to watch candidate directory"
                ),
            }
        }
        debug!(
            target: WATCH_TARGET,
            directories = ?self.directories,
            "watching for routing script"
        );
    }

    fn disarm_directories(&mut self) {
        for directory in self.directories.drain(..) {
            if let Err(error) = self.backend.unwatch(&directory) {
                debug!(
                    target: WATCH_TARGET,
                    path = %directory.display(),
                    %error,
                    "failed to unwatch candidate directory"
                );
            }
        }
    }

    fn set_state(&self, state: WatchState) {
        self.state.store(state.encode(), Ordering::Release);
    }
}

fn is_removal(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::Any))
    )
}
