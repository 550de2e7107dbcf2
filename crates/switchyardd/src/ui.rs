//! Messages exchanged with the optional UI surface.
//!
//! Outbound messages serialise as `{"type": ..., "message": ...}`. Inbound
//! requests are `ready`, `testUrl` (with a `url`) and `closed`.

use std::io::{BufRead, Write};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatch::Event;
use crate::engine::{ConfigOptions, RuntimeConfigState};
use crate::evaluator::LaunchDescriptor;
use crate::updates::UpdateNotice;

const UI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ui");

/// Configuration summary sent after each reload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMessage {
    /// Script that was loaded, if one was found.
    pub config_path: Option<String>,
    /// Script summary when an engine is installed.
    #[serde(flatten)]
    pub state: Option<RuntimeConfigState>,
    /// Effective options.
    pub options: ConfigOptions,
    /// Last reload error, if the most recent attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to a `testUrl` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TestUrlResult {
    /// The URL was routed.
    #[serde(rename_all = "camelCase")]
    Routed {
        /// URL after rewrites.
        url: String,
        /// Chosen application.
        browser: String,
        /// Background flag.
        open_in_background: bool,
        /// Browser profile.
        profile: String,
        /// Extra arguments.
        args: Vec<String>,
    },
    /// Routing failed.
    Failed {
        /// Reason shown to the user.
        error: String,
    },
}

impl From<&LaunchDescriptor> for TestUrlResult {
    fn from(descriptor: &LaunchDescriptor) -> Self {
        Self::Routed {
            url: descriptor.url.clone(),
            browser: descriptor.target.clone(),
            open_in_background: descriptor.open_in_background,
            profile: descriptor.profile.clone(),
            args: descriptor.args.clone(),
        }
    }
}

/// Outbound UI message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum UiMessage {
    /// Configuration summary.
    Config(ConfigMessage),
    /// A log line destined for the UI console.
    Log(String),
    /// Update availability.
    UpdateInfo(UpdateNotice),
    /// Running version.
    Version(String),
    /// Reply to a `testUrl` request.
    TestUrlResult(TestUrlResult),
}

impl UiMessage {
    /// Serialises the message to its wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Collaborator presenting dispatcher state to the user.
pub trait UiBridge: Send + Sync {
    /// Delivers `message`, possibly after buffering.
    fn send(&self, message: UiMessage);

    /// Shows or hides the surface. Returns `true` when it is on screen
    /// afterwards.
    fn set_visible(&self, visible: bool) -> bool;
}

impl<T> UiBridge for Arc<T>
where
    T: UiBridge + ?Sized,
{
    fn send(&self, message: UiMessage) {
        (**self).send(message);
    }

    fn set_visible(&self, visible: bool) -> bool {
        (**self).set_visible(visible)
    }
}

/// Transport to a concrete UI surface.
pub trait UiSurface: Send + Sync {
    /// Delivers a serialised message.
    fn deliver(&self, payload: &str);

    /// Shows or hides the surface. Returns `true` when it is on screen
    /// afterwards.
    fn set_visible(&self, visible: bool) -> bool;
}

/// Headless surface writing messages to tracing.
///
/// It is never on screen, so showing it does not hold the process open.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUi;

impl UiSurface for LogUi {
    fn deliver(&self, payload: &str) {
        debug!(target: UI_TARGET, payload, "ui message");
    }

    fn set_visible(&self, visible: bool) -> bool {
        if visible {
            info!(target: UI_TARGET, "no ui attached; see the log for details");
        }
        false
    }
}

/// Surface speaking JSON lines to an attached front end.
pub struct StreamSurface<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> StreamSurface<W> {
    /// Writes one message per line to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> UiSurface for StreamSurface<W> {
    fn deliver(&self, payload: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = writeln!(writer, "{payload}").and_then(|()| writer.flush()) {
            warn!(target: UI_TARGET, %error, "failed to write ui message");
        }
    }

    fn set_visible(&self, visible: bool) -> bool {
        debug!(target: UI_TARGET, visible, "ui visibility changed");
        visible
    }
}

#[derive(Debug, Default)]
struct Queue {
    ready: bool,
    pending: Vec<String>,
}

/// Bridge buffering messages until its surface reports ready.
pub struct QueuedUi<S> {
    surface: S,
    queue: Mutex<Queue>,
}

impl<S: UiSurface> QueuedUi<S> {
    /// Wraps `surface`, starting in the buffering state.
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            queue: Mutex::new(Queue::default()),
        }
    }

    /// Marks the surface ready and flushes buffered messages in order.
    pub fn mark_ready(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.ready = true;
        for payload in queue.pending.drain(..) {
            self.surface.deliver(&payload);
        }
    }

    /// Number of messages waiting for the surface.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

impl<S: UiSurface> UiBridge for QueuedUi<S> {
    fn send(&self, message: UiMessage) {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(target: UI_TARGET, %error, "failed to serialise ui message");
                return;
            }
        };
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.ready {
            self.surface.deliver(&payload);
        } else {
            queue.pending.push(payload);
        }
    }

    fn set_visible(&self, visible: bool) -> bool {
        self.surface.set_visible(visible)
    }
}

/// Errors raised while decoding inbound UI messages.
#[derive(Debug, Error)]
pub enum InboundError {
    /// The payload is not a recognised JSON message.
    #[error("malformed ui message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Request sent by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiRequest {
    /// The surface can receive messages.
    Ready,
    /// Evaluate a URL without launching it.
    TestUrl {
        /// URL to evaluate.
        url: String,
    },
    /// The surface was closed.
    Closed,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Inbound {
    Ready,
    TestUrl { url: String },
    Closed,
    #[serde(other)]
    Unknown,
}

/// Decodes one inbound UI message.
///
/// Unknown message types are logged and yield `None`.
pub fn parse_inbound(payload: &str) -> Result<Option<UiRequest>, InboundError> {
    match serde_json::from_str(payload)? {
        Inbound::Ready => Ok(Some(UiRequest::Ready)),
        Inbound::TestUrl { url } => Ok(Some(UiRequest::TestUrl { url })),
        Inbound::Closed => Ok(Some(UiRequest::Closed)),
        Inbound::Unknown => {
            debug!(target: UI_TARGET, payload, "ignoring unknown ui message");
            Ok(None)
        }
    }
}

/// Reads UI requests from `reader` until it ends or the dispatcher goes away.
///
/// `ready` flushes `ui`, `testUrl` and `closed` become dispatcher events, and
/// the end of input counts as the surface closing.
pub fn forward_inbound<R, S>(reader: R, ui: &QueuedUi<S>, events: &Sender<Event>)
where
    R: BufRead,
    S: UiSurface,
{
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                warn!(target: UI_TARGET, %error, "failed to read ui input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let event = match parse_inbound(&line) {
            Ok(Some(UiRequest::Ready)) => {
                ui.mark_ready();
                continue;
            }
            Ok(Some(UiRequest::TestUrl { url })) => Event::TestUrl { url },
            Ok(Some(UiRequest::Closed)) => Event::UiClosed,
            Ok(None) => continue,
            Err(error) => {
                warn!(target: UI_TARGET, %error, "discarding ui message");
                continue;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
    debug!(target: UI_TARGET, "ui input closed");
    events.send(Event::UiClosed).ok();
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::mpsc;

    use rstest::rstest;
    use serde_json::{Value, json};

    use super::*;

    #[derive(Default)]
    struct RecordingSurface {
        delivered: Mutex<Vec<String>>,
    }

    impl UiSurface for RecordingSurface {
        fn deliver(&self, payload: &str) {
            self.delivered
                .lock()
                .expect("delivered lock")
                .push(payload.to_owned());
        }

        fn set_visible(&self, visible: bool) -> bool {
            visible
        }
    }

    #[rstest]
    fn messages_use_type_and_message_keys() {
        let message = UiMessage::Version("1.2.3".to_owned());
        let value: Value =
            serde_json::from_str(&message.to_json().expect("serialise")).expect("json");
        assert_eq!(value, json!({"type": "version", "message": "1.2.3"}));
    }

    #[rstest]
    fn config_message_flattens_state() {
        let message = UiMessage::Config(ConfigMessage {
            config_path: Some("/home/u/.switchyard.rhai".to_owned()),
            state: Some(RuntimeConfigState {
                handlers: 2,
                rewrites: 1,
                default_browser: "Firefox".to_owned(),
                is_valid: true,
            }),
            options: ConfigOptions::default(),
            error: None,
        });
        let value: Value =
            serde_json::from_str(&message.to_json().expect("serialise")).expect("json");
        assert_eq!(value["type"], "config");
        assert_eq!(value["message"]["handlers"], 2);
        assert_eq!(value["message"]["defaultBrowser"], "Firefox");
        assert_eq!(value["message"]["options"]["keepRunning"], true);
        assert!(value["message"].get("error").is_none());
    }

    #[rstest]
    fn test_url_failures_only_carry_the_error() {
        let message = UiMessage::TestUrlResult(TestUrlResult::Failed {
            error: "Configuration not loaded".to_owned(),
        });
        let value: Value =
            serde_json::from_str(&message.to_json().expect("serialise")).expect("json");
        assert_eq!(
            value,
            json!({"type": "testUrlResult", "message": {"error": "Configuration not loaded"}})
        );
    }

    #[rstest]
    fn queued_messages_flush_in_order_once_ready() {
        let ui = QueuedUi::new(RecordingSurface::default());
        ui.send(UiMessage::Log("first".to_owned()));
        ui.send(UiMessage::Log("second".to_owned()));
        assert_eq!(ui.pending(), 2);
        assert!(ui.surface.delivered.lock().expect("lock").is_empty());

        ui.mark_ready();
        ui.send(UiMessage::Log("third".to_owned()));

        let delivered = ui.surface.delivered.lock().expect("lock").clone();
        assert_eq!(ui.pending(), 0);
        assert_eq!(delivered.len(), 3);
        assert!(delivered[0].contains("first"));
        assert!(delivered[2].contains("third"));
    }

    #[rstest]
    #[case::ready(r#"{"type":"ready"}"#, UiRequest::Ready)]
    #[case::closed(r#"{"type":"closed"}"#, UiRequest::Closed)]
    #[case::test_url(
        r#"{"type":"testUrl","url":"https://example.com"}"#,
        UiRequest::TestUrl { url: "https://example.com".to_owned() }
    )]
    fn known_requests_are_decoded(#[case] payload: &str, #[case] expected: UiRequest) {
        assert_eq!(parse_inbound(payload).expect("valid message"), Some(expected));
    }

    #[rstest]
    fn inbound_lines_drive_the_queue_and_the_dispatcher() {
        let ui = QueuedUi::new(RecordingSurface::default());
        ui.send(UiMessage::Version("1.0.0".to_owned()));
        let input = concat!(
            "{\"type\":\"ready\"}\n",
            "\n",
            "not json\n",
            "{\"type\":\"testUrl\",\"url\":\"https://example.com\"}\n",
            "{\"type\":\"resize\"}\n",
        );
        let (events, received) = mpsc::channel();

        forward_inbound(Cursor::new(input), &ui, &events);

        assert_eq!(ui.pending(), 0);
        assert_eq!(ui.surface.delivered.lock().expect("lock").len(), 1);
        let forwarded: Vec<Event> = received.try_iter().collect();
        assert_eq!(
            forwarded,
            vec![
                Event::TestUrl {
                    url: "https://example.com".to_owned()
                },
                Event::UiClosed,
            ]
        );
    }

    #[rstest]
    fn stream_surface_writes_one_message_per_line() {
        let surface = StreamSurface::new(Vec::new());
        surface.deliver(r#"{"type":"log","message":"a"}"#);
        surface.deliver(r#"{"type":"log","message":"b"}"#);

        assert!(surface.set_visible(true));
        let written = surface.writer.into_inner().expect("writer lock");
        let text = String::from_utf8(written).expect("utf8");
        assert_eq!(text.lines().count(), 2);
    }

    #[rstest]
    fn headless_surface_is_never_on_screen() {
        assert!(!LogUi.set_visible(true));
    }

    #[rstest]
    #[case::unknown(r#"{"type":"resize","width":3}"#)]
    fn unknown_requests_are_ignored(#[case] payload: &str) {
        assert_eq!(parse_inbound(payload).expect("valid json"), None);
    }

    #[rstest]
    fn malformed_requests_are_errors() {
        assert!(parse_inbound("not json").is_err());
    }
}
