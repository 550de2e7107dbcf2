//! Idle-exit policy.
//!
//! With `keep_running` disabled and no UI on screen the dispatcher exits once
//! `idle_timeout` has passed since startup or the last routed URL.

use std::time::{Duration, Instant};

use tracing::debug;

use super::{DISPATCH_TARGET, ExitReason};

/// Tracks activity and decides when the dispatcher may exit.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    idle_timeout: Duration,
    keep_running: bool,
    ui_visible: bool,
    last_activity: Instant,
    deadline: Option<Instant>,
}

impl LifecycleController {
    /// Starts tracking at `now` with `keep_running` assumed on.
    #[must_use]
    pub fn new(idle_timeout: Duration, now: Instant) -> Self {
        Self {
            idle_timeout,
            keep_running: true,
            ui_visible: false,
            last_activity: now,
            deadline: None,
        }
    }

    /// Applies the script's `keep_running` option after a reload at `now`.
    ///
    /// Switching residency off restarts the idle interval from `now`.
    pub fn apply_policy(&mut self, keep_running: bool, now: Instant) {
        if self.keep_running && !keep_running {
            self.last_activity = now;
        }
        self.keep_running = keep_running;
        self.rearm();
    }

    /// Records a routed URL at `now`.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.rearm();
    }

    /// The UI became visible.
    pub fn ui_shown(&mut self) {
        self.ui_visible = true;
        self.rearm();
    }

    /// The UI was closed at `now`.
    pub fn ui_hidden(&mut self, now: Instant) {
        self.ui_visible = false;
        self.last_activity = now;
        self.rearm();
    }

    /// Whether the process stays resident.
    #[must_use]
    pub const fn keep_running(&self) -> bool {
        self.keep_running
    }

    /// Whether the UI is on screen.
    #[must_use]
    pub const fn ui_visible(&self) -> bool {
        self.ui_visible
    }

    /// Pending idle deadline, if armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns [`ExitReason::Idle`] once an armed deadline has passed.
    pub fn on_timeout(&mut self, now: Instant) -> Option<ExitReason> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                debug!(target: DISPATCH_TARGET, "idle deadline reached");
                self.deadline = None;
                Some(ExitReason::Idle)
            }
            _ => None,
        }
    }

    fn rearm(&mut self) {
        self.deadline = (!self.keep_running && !self.ui_visible)
            .then(|| self.last_activity + self.idle_timeout);
    }
}
