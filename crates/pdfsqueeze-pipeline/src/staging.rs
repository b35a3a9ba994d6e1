//! Per-request on-disk staging with guaranteed release.
//!
//! # Design
//! - Paths are derived from the request id and created with `create_new`, so two
//!   runs can never share a file.
//! - [`StagedRun`] owns both paths only once [`StagingStore::stage`] has created
//!   the input, and deletes them exactly once, from an explicit
//!   [`StagedRun::release`] or from `Drop` when the owning future is cancelled.
//!   A guard that lost a collision owns nothing and deletes nothing.
//! - The upload ceiling is checked before each chunk is written, so nothing past
//!   the limit ever reaches disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::{Duration, SystemTime};

use futures_core::Stream;
use futures_util::StreamExt;
use pdfsqueeze_config::StagingConfig;
use pdfsqueeze_telemetry::Metrics;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::document::SNIFF_LEN;
use crate::error::{PayloadReadError, StagingError, StagingResult};

const INPUT_SUFFIX: &str = ".input";
const OUTPUT_SUFFIX: &str = ".output";
const PROBE_PREFIX: &str = ".probe-";

/// Result of writing a payload to staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPayload {
    /// Bytes written.
    pub size_bytes: u64,
    /// Leading bytes, used for document detection.
    pub head: Vec<u8>,
}

/// Counts from a best-effort release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Paths deleted.
    pub removed: usize,
    /// Paths that did not exist.
    pub missing: usize,
    /// Paths that could not be deleted.
    pub failed: usize,
}

impl ReleaseReport {
    fn record(&mut self, outcome: RemoveOutcome) {
        match outcome {
            RemoveOutcome::Removed => self.removed += 1,
            RemoveOutcome::Missing => self.missing += 1,
            RemoveOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveOutcome {
    Removed,
    Missing,
    Failed,
}

fn remove_path(path: &Path, metrics: &Metrics) -> RemoveOutcome {
    match fs::remove_file(path) {
        Ok(()) => RemoveOutcome::Removed,
        Err(err) if err.kind() == io::ErrorKind::NotFound => RemoveOutcome::Missing,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "failed to remove staged file");
            metrics.inc_staging_cleanup_failure();
            RemoveOutcome::Failed
        }
    }
}

/// Staging directory shared by all runs.
#[derive(Clone)]
pub struct StagingStore {
    config: StagingConfig,
    metrics: Metrics,
}

impl StagingStore {
    /// Open the store, creating the base directory when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Io`] if the directory cannot be created.
    pub async fn open(config: StagingConfig, metrics: Metrics) -> StagingResult<Self> {
        tokio::fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|source| StagingError::Io {
                operation: "create_base_dir",
                path: config.base_dir.clone(),
                source,
            })?;
        Ok(Self { config, metrics })
    }

    /// Directory holding staged files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Upload ceiling in bytes.
    #[must_use]
    pub const fn max_upload_bytes(&self) -> u64 {
        self.config.max_upload_bytes
    }

    /// Configured startup purge threshold.
    #[must_use]
    pub const fn purge_stale_after(&self) -> Option<Duration> {
        self.config.purge_stale_after
    }

    /// Input path for a request.
    #[must_use]
    pub fn input_path(&self, request_id: Uuid) -> PathBuf {
        self.config
            .base_dir
            .join(format!("{request_id}{INPUT_SUFFIX}"))
    }

    /// Output path for a request. The file does not exist until the engine writes it.
    #[must_use]
    pub fn allocate_output_path(&self, request_id: Uuid) -> PathBuf {
        self.config
            .base_dir
            .join(format!("{request_id}{OUTPUT_SUFFIX}"))
    }

    /// Whether a live run already holds the paths for `request_id`.
    pub async fn is_in_use(&self, request_id: Uuid) -> bool {
        for path in [
            self.input_path(request_id),
            self.allocate_output_path(request_id),
        ] {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// Guard for a request's paths. It owns nothing until [`Self::stage`]
    /// creates the input.
    #[must_use]
    pub fn begin(&self, request_id: Uuid) -> StagedRun {
        StagedRun {
            request_id,
            input: self.input_path(request_id),
            output: self.allocate_output_path(request_id),
            owned: false,
            metrics: self.metrics.clone(),
        }
    }

    /// Stream a payload into the run's input path.
    ///
    /// `on_progress` receives the running byte count after each chunk.
    ///
    /// # Errors
    ///
    /// - [`StagingError::PayloadTooLarge`] when the ceiling would be exceeded.
    /// - [`StagingError::Payload`] when the stream fails.
    /// - [`StagingError::PathCollision`] when the input path already exists;
    ///   the guard stays unowned so the other run's files survive.
    /// - [`StagingError::Io`] for filesystem failures.
    pub async fn stage<S, B, F>(
        &self,
        run: &mut StagedRun,
        payload: S,
        mut on_progress: F,
    ) -> StagingResult<StagedPayload>
    where
        S: Stream<Item = Result<B, PayloadReadError>>,
        B: AsRef<[u8]>,
        F: FnMut(u64),
    {
        let limit = self.config.max_upload_bytes;
        let path = run.input.clone();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    StagingError::PathCollision { path: path.clone() }
                } else {
                    StagingError::Io {
                        operation: "create_input",
                        path: path.clone(),
                        source,
                    }
                }
            })?;
        run.owned = true;

        let mut payload = pin!(payload);
        let mut written: u64 = 0;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|source| match source {
                PayloadReadError::LimitExceeded => StagingError::PayloadTooLarge { limit },
                other => StagingError::Payload { source: other },
            })?;
            let bytes = chunk.as_ref();
            let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            if written.saturating_add(len) > limit {
                debug!(limit, written, "upload ceiling reached while staging");
                return Err(StagingError::PayloadTooLarge { limit });
            }
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(bytes.len());
                head.extend_from_slice(&bytes[..take]);
            }
            file.write_all(bytes)
                .await
                .map_err(|source| StagingError::Io {
                    operation: "write_input",
                    path: path.clone(),
                    source,
                })?;
            written += len;
            on_progress(written);
        }

        file.flush().await.map_err(|source| StagingError::Io {
            operation: "flush_input",
            path: path.clone(),
            source,
        })?;
        file.sync_all().await.map_err(|source| StagingError::Io {
            operation: "sync_input",
            path,
            source,
        })?;

        self.metrics.add_staged_bytes(written);
        Ok(StagedPayload {
            size_bytes: written,
            head,
        })
    }

    /// Delete every path, swallowing individual failures.
    ///
    /// Missing paths are not failures; other errors are logged and counted.
    pub fn release(&self, paths: &[&Path]) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        for path in paths {
            report.record(remove_path(path, &self.metrics));
        }
        report
    }

    /// Remove staged files last modified longer than `older_than` ago.
    ///
    /// Only files carrying the staging suffixes are considered.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Walkdir`] if the base directory cannot be read.
    pub fn purge_stale(&self, older_than: Duration) -> StagingResult<usize> {
        let base = &self.config.base_dir;
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0usize;

        for entry in WalkDir::new(base).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|source| StagingError::Walkdir {
                path: base.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let staged = name.ends_with(INPUT_SUFFIX)
                || name.ends_with(OUTPUT_SUFFIX)
                || name.starts_with(PROBE_PREFIX);
            if !staged {
                continue;
            }
            let modified = match entry.metadata().map(|meta| meta.modified()) {
                Ok(Ok(modified)) => modified,
                Ok(Err(err)) => {
                    warn!(error = %err, path = %entry.path().display(), "staged file has no modification time");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, path = %entry.path().display(), "failed to stat staged file");
                    continue;
                }
            };
            if modified <= cutoff
                && remove_path(entry.path(), &self.metrics) == RemoveOutcome::Removed
            {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, dir = %base.display(), "purged stale staging files");
        }
        Ok(removed)
    }

    /// Confirm the base directory accepts new files.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Io`] if a probe file cannot be created.
    pub async fn probe_writable(&self) -> StagingResult<()> {
        let path = self
            .config
            .base_dir
            .join(format!("{PROBE_PREFIX}{}", Uuid::new_v4()));
        tokio::fs::write(&path, b"")
            .await
            .map_err(|source| StagingError::Io {
                operation: "probe_write",
                path: path.clone(),
                source,
            })?;
        remove_path(&path, &self.metrics);
        Ok(())
    }
}

/// Guard over one request's staged paths.
pub struct StagedRun {
    request_id: Uuid,
    input: PathBuf,
    output: PathBuf,
    owned: bool,
    metrics: Metrics,
}

impl StagedRun {
    /// Staged input path.
    #[must_use]
    pub fn input_path(&self) -> &Path {
        &self.input
    }

    /// Allocated output path.
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Delete both paths if this guard created them. Later calls are no-ops.
    pub fn release(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if !self.owned {
            return report;
        }
        self.owned = false;
        report.record(remove_path(&self.input, &self.metrics));
        report.record(remove_path(&self.output, &self.metrics));
        debug!(
            request_id = %self.request_id,
            removed = report.removed,
            failed = report.failed,
            "released staged paths"
        );
        report
    }
}

impl Drop for StagedRun {
    fn drop(&mut self) {
        self.release();
    }
}
