//! Release polling with a persisted daily schedule.
//!
//! The last answer from the [`ReleaseSource`] is stored in
//! `last_update_check.json`. Within [`UPDATE_INTERVAL`] of that answer the
//! stored release is reused instead of asking again.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::pipeline::atomic_write;

const UPDATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::updates");

/// Minimum spacing between release lookups.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Release metadata returned by a [`ReleaseSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReleaseInfo {
    /// Source reported a newer release.
    pub has_update: bool,
    /// Latest published version.
    pub latest_version: String,
    /// Download location.
    pub download_url: String,
    /// Release notes location.
    pub release_url: String,
}

/// Persisted result of the last lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Release reported at that time.
    pub release_info: ReleaseInfo,
}

/// Payload of the `updateInfo` UI message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotice {
    /// Latest known version, empty when unknown.
    pub version: String,
    /// A newer version than the running one exists.
    pub has_update: bool,
    /// Whether the script allows update checks.
    pub update_check_enabled: bool,
    /// Download location.
    pub download_url: String,
    /// Release notes location.
    pub release_url: String,
}

impl UpdateNotice {
    fn disabled() -> Self {
        Self::default()
    }

    fn unknown() -> Self {
        Self {
            update_check_enabled: true,
            ..Self::default()
        }
    }

    fn from_release(release: &ReleaseInfo, has_update: bool) -> Self {
        Self {
            version: release.latest_version.clone(),
            has_update,
            update_check_enabled: true,
            download_url: release.download_url.clone(),
            release_url: release.release_url.clone(),
        }
    }
}

/// Errors reported by release sources.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The lookup failed.
    #[error("release lookup failed: {0}")]
    Lookup(String),
}

/// Answers which release is current.
pub trait ReleaseSource: Send + Sync {
    /// Returns the latest release, or `None` when the source has no answer.
    fn latest(&self, current_version: &str) -> Result<Option<ReleaseInfo>, ReleaseError>;
}

/// Source that never reports a release.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReleaseSource;

impl ReleaseSource for NoReleaseSource {
    fn latest(&self, _current_version: &str) -> Result<Option<ReleaseInfo>, ReleaseError> {
        Ok(None)
    }
}

/// Runs release lookups no more than once per interval.
#[derive(Clone)]
pub struct UpdateChecker {
    record_path: PathBuf,
    current_version: String,
    source: Arc<dyn ReleaseSource>,
    interval: Duration,
}

impl std::fmt::Debug for UpdateChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateChecker")
            .field("record_path", &self.record_path)
            .field("current_version", &self.current_version)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl UpdateChecker {
    /// Builds a checker persisting to `record_path`.
    pub fn new(
        record_path: impl Into<PathBuf>,
        current_version: impl Into<String>,
        source: Arc<dyn ReleaseSource>,
    ) -> Self {
        Self {
            record_path: record_path.into(),
            current_version: current_version.into(),
            source,
            interval: UPDATE_INTERVAL,
        }
    }

    /// Overrides the lookup interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Path of the persisted record.
    #[must_use]
    pub fn record_path(&self) -> &Path {
        self.record_path.as_path()
    }

    /// Loads the persisted record, treating unreadable files as absent.
    #[must_use]
    pub fn record(&self) -> Option<UpdateRecord> {
        let bytes = fs::read(&self.record_path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(error) => {
                debug!(
                    target: UPDATE_TARGET,
                    path = %self.record_path.display(),
                    %error,
                    "ignoring malformed update record"
                );
                None
            }
        }
    }

    /// Returns `true` when no record exists or it is older than the interval.
    #[must_use]
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.fresh_record(now).is_none()
    }

    /// Runs a check against the current time.
    pub fn check(&self, enabled: bool) -> UpdateNotice {
        self.check_at(enabled, OffsetDateTime::now_utc())
    }

    /// Runs a check as if the clock read `now`.
    pub fn check_at(&self, enabled: bool, now: OffsetDateTime) -> UpdateNotice {
        if !enabled {
            debug!(target: UPDATE_TARGET, "update checks disabled by configuration");
            return UpdateNotice::disabled();
        }

        if let Some(record) = self.fresh_record(now) {
            debug!(
                target: UPDATE_TARGET,
                checked_at = record.timestamp,
                "reusing recent update check"
            );
            return self.notice(&record.release_info);
        }

        info!(
            target: UPDATE_TARGET,
            version = %self.current_version,
            "checking for updates"
        );
        let release = match self.source.latest(&self.current_version) {
            Ok(Some(release)) => release,
            Ok(None) => {
                debug!(target: UPDATE_TARGET, "release source had no answer");
                return UpdateNotice::unknown();
            }
            Err(error) => {
                warn!(target: UPDATE_TARGET, %error, "update check failed");
                return UpdateNotice::unknown();
            }
        };
        self.store(&UpdateRecord {
            timestamp: now.unix_timestamp(),
            release_info: release.clone(),
        });
        self.notice(&release)
    }

    fn fresh_record(&self, now: OffsetDateTime) -> Option<UpdateRecord> {
        let record = self.record()?;
        if record.timestamp <= 0 {
            return None;
        }
        let age = now.unix_timestamp().saturating_sub(record.timestamp);
        let interval = i64::try_from(self.interval.as_secs()).unwrap_or(i64::MAX);
        (age < interval).then_some(record)
    }

    fn notice(&self, release: &ReleaseInfo) -> UpdateNotice {
        let has_update = is_newer(&self.current_version, &release.latest_version);
        if has_update {
            info!(
                target: UPDATE_TARGET,
                current = %self.current_version,
                latest = %release.latest_version,
                "new version available"
            );
        }
        UpdateNotice::from_release(release, has_update)
    }

    fn store(&self, record: &UpdateRecord) {
        let result = serde_json::to_vec(record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| atomic_write(&self.record_path, &bytes));
        if let Err(error) = result {
            warn!(
                target: UPDATE_TARGET,
                path = %self.record_path.display(),
                %error,
                "failed to persist update record"
            );
        }
    }
}

/// Returns `true` when `latest` is a strictly higher version than `current`.
///
/// Versions compare by their dot-separated numeric components; a leading `v`
/// and any pre-release or build suffix are ignored.
#[must_use]
pub fn is_newer(current: &str, latest: &str) -> bool {
    match (version_components(current), version_components(latest)) {
        (Some(current), Some(latest)) => compare_components(&latest, &current) == Ordering::Greater,
        _ => false,
    }
}

fn version_components(version: &str) -> Option<Vec<u64>> {
    let trimmed = version.trim().trim_start_matches('v');
    let core = trimmed
        .split(['-', '+'])
        .next()
        .filter(|core| !core.is_empty())?;
    core.split('.').map(|part| part.parse().ok()).collect()
}

fn compare_components(left: &[u64], right: &[u64]) -> Ordering {
    let width = left.len().max(right.len());
    let padded = |parts: &[u64]| {
        let mut padded = parts.to_vec();
        padded.resize(width, 0);
        padded
    };
    padded(left).cmp(&padded(right))
}
