//! Maps URL requests to launch descriptors through the loaded script.

use std::fmt;
use std::str::FromStr;

use rhai::Dynamic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{ScriptEngine, app_kind};

/// Browser used when no configuration is loaded or evaluation fails.
pub const DEFAULT_BROWSER: &str = "com.apple.Safari";

/// Application that asked for the URL to be opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenerInfo {
    /// Display name.
    pub name: String,
    /// Bundle identifier, when known.
    #[serde(default)]
    pub bundle_id: Option<String>,
    /// Executable path, when known.
    #[serde(default)]
    pub path: Option<String>,
}

/// A URL waiting to be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRequest {
    /// URL as received.
    pub url: String,
    /// Requesting application.
    pub opener: Option<OpenerInfo>,
    /// Caller asked for the target to stay in the background.
    pub open_in_background: bool,
}

impl UrlRequest {
    /// Request for `url` with no opener metadata.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            opener: None,
            open_in_background: false,
        }
    }
}

/// How a launch target is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AppKind {
    /// Application display name.
    AppName,
    /// Reverse-DNS bundle identifier.
    BundleId,
    /// Filesystem path to the application.
    Path,
    /// Launch nothing.
    None,
}

impl fmt::Display for AppKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AppName => "appName",
            Self::BundleId => "bundleId",
            Self::Path => "path",
            Self::None => "none",
        };
        formatter.write_str(label)
    }
}

/// Error returned when parsing an app kind fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported app type: {0}")]
pub struct AppKindParseError(String);

impl FromStr for AppKind {
    type Err = AppKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "appName" => Ok(Self::AppName),
            "bundleId" => Ok(Self::BundleId),
            "path" => Ok(Self::Path),
            "none" => Ok(Self::None),
            other => Err(AppKindParseError(other.to_owned())),
        }
    }
}

/// What to launch for a routed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDescriptor {
    /// Application name, bundle id or path.
    pub target: String,
    /// How `target` is interpreted.
    pub kind: AppKind,
    /// Keep the launched application in the background.
    pub open_in_background: bool,
    /// Browser profile, empty for none.
    pub profile: String,
    /// Extra arguments; when present they replace the URL.
    pub args: Vec<String>,
    /// URL after rewrites.
    pub url: String,
}

impl LaunchDescriptor {
    /// Descriptor opening `url` in [`DEFAULT_BROWSER`].
    pub fn fallback(url: impl Into<String>, open_in_background: bool) -> Self {
        Self {
            target: DEFAULT_BROWSER.to_owned(),
            kind: AppKind::BundleId,
            open_in_background,
            profile: String::new(),
            args: Vec::new(),
            url: url.into(),
        }
    }

    /// Returns `true` when nothing should be launched.
    pub fn is_noop(&self) -> bool {
        self.kind == AppKind::None
    }
}

/// Errors raised while evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// No configuration is loaded.
    #[error("no configuration loaded")]
    NoConfiguration,
    /// The script raised an error outside its own error handling.
    #[error("script evaluation failed: {0}")]
    Script(String),
    /// The script returned a value that is not a routing result.
    #[error("script returned a malformed result: {0}")]
    Malformed(String),
    /// The script reported an error alongside its result.
    #[error("configuration reported an error: {message}")]
    Reported {
        /// Error text from the script.
        message: String,
        /// Descriptor the script fell back to, if any.
        descriptor: Option<Box<LaunchDescriptor>>,
    },
}

#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    #[serde(default)]
    browser: Option<ScriptBrowser>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptBrowser {
    name: String,
    #[serde(default)]
    app_type: String,
    #[serde(default)]
    open_in_background: bool,
    #[serde(default)]
    profile: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    url: String,
}

impl ScriptBrowser {
    fn into_descriptor(self, request: &UrlRequest) -> Result<LaunchDescriptor, EvaluationError> {
        let kind = if self.app_type.is_empty() {
            app_kind(&self.name)
        } else {
            self.app_type.as_str()
        };
        let kind = kind
            .parse::<AppKind>()
            .map_err(|error| EvaluationError::Malformed(error.to_string()))?;
        let url = if self.url.is_empty() {
            request.url.clone()
        } else {
            self.url
        };
        Ok(LaunchDescriptor {
            target: self.name,
            kind,
            open_in_background: self.open_in_background || request.open_in_background,
            profile: self.profile,
            args: self.args,
            url,
        })
    }
}

/// Evaluates `request` against the loaded configuration.
pub fn evaluate(
    engine: Option<&ScriptEngine>,
    request: &UrlRequest,
) -> Result<LaunchDescriptor, EvaluationError> {
    let engine = engine.ok_or(EvaluationError::NoConfiguration)?;
    let opener = match &request.opener {
        Some(opener) => rhai::serde::to_dynamic(opener)
            .map_err(|error| EvaluationError::Malformed(error.to_string()))?,
        None => Dynamic::UNIT,
    };
    let result = engine
        .open_url(&request.url, opener)
        .map_err(|error| EvaluationError::Script(error.to_string()))?;
    let outcome: ScriptOutcome = rhai::serde::from_dynamic(&result)
        .map_err(|error| EvaluationError::Malformed(error.to_string()))?;

    let descriptor = outcome
        .browser
        .map(|browser| browser.into_descriptor(request))
        .transpose()?;
    match (outcome.error.filter(|message| !message.is_empty()), descriptor) {
        (Some(message), descriptor) => Err(EvaluationError::Reported {
            message,
            descriptor: descriptor.map(Box::new),
        }),
        (None, Some(descriptor)) => Ok(descriptor),
        (None, None) => Err(EvaluationError::Malformed(
            "result carries no browser".to_owned(),
        )),
    }
}

/// Evaluates `request`, always producing something to launch.
///
/// A descriptor returned with a reported error is kept; every other failure
/// falls back to [`LaunchDescriptor::fallback`]. The error is returned so the
/// caller can log it.
pub fn route(
    engine: Option<&ScriptEngine>,
    request: &UrlRequest,
) -> (LaunchDescriptor, Option<EvaluationError>) {
    match evaluate(engine, request) {
        Ok(descriptor) => (descriptor, None),
        Err(EvaluationError::Reported {
            message,
            descriptor: Some(descriptor),
        }) => (
            (*descriptor).clone(),
            Some(EvaluationError::Reported {
                message,
                descriptor: Some(descriptor),
            }),
        ),
        Err(error) => (
            LaunchDescriptor::fallback(request.url.clone(), request.open_in_background),
            Some(error),
        ),
    }
}
