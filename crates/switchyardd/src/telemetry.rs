//! Structured logging for the dispatcher.
//!
//! Log lines always go to stderr. Under `--window` stdout carries the UI's
//! JSON-lines channel and must stay free of anything else.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, debug, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

use switchyard_config::{Config, LogFormat};

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static INSTALLED: OnceCell<LogSettings> = OnceCell::new();

/// What the process-wide subscriber was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter expression in effect.
    pub filter: String,
    /// Output format in effect.
    pub format: LogFormat,
}

impl LogSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            filter: config.log_filter().trim().to_owned(),
            format: config.log_format(),
        }
    }
}

/// Handle to the installed subscriber.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryHandle {
    settings: &'static LogSettings,
}

impl TelemetryHandle {
    /// Settings of the subscriber that is actually installed.
    ///
    /// These come from the first successful call to [`initialise`], which may
    /// differ from the configuration passed to a later one.
    #[must_use]
    pub fn settings(&self) -> &'static LogSettings {
        self.settings
    }
}

/// Errors encountered while configuring logging.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{filter}': {reason}")]
    Filter {
        /// Expression as configured.
        filter: String,
        /// Parser complaint.
        reason: String,
    },
    /// Another global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// # Examples
///
/// ```rust
/// use switchyard_config::Config;
/// use switchyardd::telemetry;
///
/// # fn main() -> Result<(), switchyardd::telemetry::TelemetryError> {
/// let config = Config::default();
/// let handle = telemetry::initialise(&config)?;
/// assert_eq!(handle.settings().format, config.log_format());
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let settings = INSTALLED.get_or_try_init(|| {
        let settings = LogSettings::from_config(config);
        tracing::subscriber::set_global_default(build_subscriber(&settings)?)
            .map_err(TelemetryError::Subscriber)?;
        debug!(
            target: TELEMETRY_TARGET,
            filter = %settings.filter,
            format = %settings.format,
            version = env!("CARGO_PKG_VERSION"),
            "logging ready"
        );
        Ok(settings)
    })?;
    Ok(TelemetryHandle { settings })
}

fn build_subscriber(
    settings: &LogSettings,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError> {
    let filter = EnvFilter::try_new(&settings.filter).map_err(|error| TelemetryError::Filter {
        filter: settings.filter.clone(),
        reason: error.to_string(),
    })?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(settings.format.use_ansi(io::stderr().is_terminal()))
        .with_timer(UtcTime::rfc_3339());

    Ok(match settings.format {
        LogFormat::Json => Box::new(
            builder
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false)
                .finish(),
        ),
        LogFormat::Compact => Box::new(builder.compact().with_target(true).finish()),
    })
}
