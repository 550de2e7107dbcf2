//! Log output settings for the dispatcher.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator, VariantNames};
use thiserror::Error;

/// How the dispatcher renders log lines on stderr.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    AsRefStr,
    Display,
    EnumIter,
    VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogFormat {
    /// One flattened JSON object per event, for a service manager's log capture.
    #[default]
    Json,
    /// Single-line text for someone watching a terminal.
    Compact,
}

impl LogFormat {
    /// Returns `true` when lines are meant to be parsed rather than read.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }

    /// Whether to colour output written to a sink that `is_terminal` or not.
    ///
    /// Structured output is never coloured.
    #[must_use]
    pub const fn use_ansi(self, is_terminal: bool) -> bool {
        is_terminal && !self.is_structured()
    }
}

/// Error returned when text does not name a [`LogFormat`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format '{given}' (expected one of: {})", LogFormat::VARIANTS.join(", "))]
pub struct LogFormatParseError {
    /// Text that failed to parse.
    pub given: String,
}

impl FromStr for LogFormat {
    type Err = LogFormatParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let wanted = text.trim();
        Self::iter()
            .find(|format| format.as_ref().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| LogFormatParseError {
                given: text.to_owned(),
            })
    }
}
