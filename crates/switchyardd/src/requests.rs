//! Optional on-disk log of routed requests.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::evaluator::{LaunchDescriptor, OpenerInfo, UrlRequest};

/// Errors raised while appending to the request log.
#[derive(Debug, Error)]
pub enum RequestLogError {
    /// The record could not be serialised.
    #[error("failed to serialise request record: {0}")]
    Serialise(#[from] serde_json::Error),
    /// The log file could not be opened or written.
    #[error("failed to append to {path}: {source}")]
    Write {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestRecord<'a> {
    timestamp: String,
    url: &'a str,
    opener: Option<&'a OpenerInfo>,
    open_in_background: bool,
    launch: &'a LaunchDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Appends one JSON line per routed request.
#[derive(Debug, Clone)]
pub struct RequestLog {
    path: PathBuf,
}

impl RequestLog {
    /// Builds a log writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Appends a record describing how `request` was routed.
    pub fn append(
        &self,
        request: &UrlRequest,
        launch: &LaunchDescriptor,
        error: Option<&str>,
    ) -> Result<(), RequestLogError> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let record = RequestRecord {
            timestamp,
            url: &request.url,
            opener: request.opener.as_ref(),
            open_in_background: request.open_in_background,
            launch,
            error,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let write_error = |source| RequestLogError::Write {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_error)?;
        file.write_all(&line).map_err(write_error)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use serde_json::Value;

    use super::*;

    #[rstest]
    fn appends_one_line_per_request() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = RequestLog::new(dir.path().join("requests.log"));
        let request = UrlRequest::new("https://example.com/");
        let launch = LaunchDescriptor::fallback("https://example.com/", false);

        log.append(&request, &launch, None).expect("first append");
        log.append(&request, &launch, Some("boom")).expect("second append");

        let contents = fs::read_to_string(log.path()).expect("read log");
        let lines: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["url"], "https://example.com/");
        assert_eq!(lines[0]["launch"]["kind"], "bundleId");
        assert!(lines[0].get("error").is_none());
        assert_eq!(lines[1]["error"], "boom");
    }
}
