//! UI double capturing messages and visibility changes.

use std::sync::Mutex;

use crate::ui::{TestUrlResult, UiBridge, UiMessage};

/// Records what the dispatcher presents.
#[derive(Debug)]
pub struct RecordingUi {
    messages: Mutex<Vec<UiMessage>>,
    visibility: Mutex<Vec<bool>>,
    interactive: bool,
}

impl Default for RecordingUi {
    fn default() -> Self {
        Self {
            messages: Mutex::default(),
            visibility: Mutex::default(),
            interactive: true,
        }
    }
}

impl RecordingUi {
    /// A surface that is never on screen, like the log-only UI.
    #[must_use]
    pub fn headless() -> Self {
        Self {
            interactive: false,
            ..Self::default()
        }
    }

    /// Captures a copy of the sent messages.
    #[must_use]
    pub fn messages(&self) -> Vec<UiMessage> {
        self.messages
            .lock()
            .expect("ui mutex poisoned")
            .clone()
    }

    /// Returns `true` once the surface was asked to show itself.
    #[must_use]
    pub fn was_shown(&self) -> bool {
        self.visibility
            .lock()
            .expect("ui mutex poisoned")
            .contains(&true)
    }

    /// Most recent test URL reply.
    #[must_use]
    pub fn last_test_result(&self) -> Option<TestUrlResult> {
        self.messages().into_iter().rev().find_map(|message| match message {
            UiMessage::TestUrlResult(result) => Some(result),
            _ => None,
        })
    }
}

impl UiBridge for RecordingUi {
    fn send(&self, message: UiMessage) {
        self.messages
            .lock()
            .expect("ui mutex poisoned")
            .push(message);
    }

    fn set_visible(&self, visible: bool) -> bool {
        self.visibility
            .lock()
            .expect("ui mutex poisoned")
            .push(visible);
        visible && self.interactive
    }
}
