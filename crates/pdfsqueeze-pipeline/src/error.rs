//! # Design
//!
//! - Provide structured, constant-message errors for each pipeline stage.
//! - Capture operation context (paths, limits, exit details) as fields, never in messages.
//! - `PipelineError` is the request-level taxonomy; its `kind` and `status_code`
//!   drive the HTTP mapping.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use pdfsqueeze_events::RunPhase;
use thiserror::Error;

/// Result type for staging operations.
pub type StagingResult<T> = Result<T, StagingError>;
/// Result type for engine invocations.
pub type InvokeResult<T> = Result<T, InvokeError>;
/// Result type for whole pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures raised while reading an inbound payload stream.
#[derive(Debug, Error)]
pub enum PayloadReadError {
    /// The transport refused to deliver more bytes than its limit.
    #[error("payload exceeded the transport limit")]
    LimitExceeded,
    /// The payload stream was malformed or interrupted.
    #[error("payload stream malformed")]
    Malformed {
        /// Transport-provided detail.
        detail: String,
    },
}

/// Errors produced by the staging store.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Payload exceeded the configured ceiling; nothing past the limit was written.
    #[error("payload too large")]
    PayloadTooLarge {
        /// Configured ceiling in bytes.
        limit: u64,
    },
    /// Payload stream failed mid-transfer.
    #[error("payload read failure")]
    Payload {
        /// Underlying read failure.
        #[source]
        source: PayloadReadError,
    },
    /// A staged path already existed when it was created.
    #[error("staging path collision")]
    PathCollision {
        /// Path that already existed.
        path: PathBuf,
    },
    /// IO failures while interacting with the staging directory.
    #[error("staging io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory traversal failed during a stale-file purge.
    #[error("staging walkdir failure")]
    Walkdir {
        /// Directory being traversed.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
}

/// Exit details of a failed engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Machine-readable failure reason.
    pub reason: &'static str,
    /// Exit code when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal when the process was killed.
    pub signal: Option<i32>,
    /// Bounded tail of the engine's stderr.
    pub stderr_tail: String,
}

/// Errors produced by the transformation invoker.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The engine did not finish within its wall-clock budget and was terminated.
    #[error("engine timed out")]
    Timeout {
        /// Budget that was exceeded.
        limit: Duration,
    },
    /// The engine could not be launched, exited unsuccessfully, or produced no output.
    #[error("engine failed")]
    EngineFailed {
        /// Exit details for diagnostics.
        exit: ExitInfo,
    },
}

/// Out-of-order move attempted on a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal run transition")]
pub struct TransitionError {
    /// State the run was in.
    pub from: RunPhase,
    /// State that was requested.
    pub to: RunPhase,
}

/// Request-level errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request carried no file payload.
    #[error("no file was uploaded")]
    PayloadMissing,
    /// Payload exceeded the configured ceiling.
    #[error("uploaded file is too large")]
    PayloadTooLarge {
        /// Configured ceiling in bytes.
        limit: u64,
    },
    /// Quality token is unknown and the preset policy rejects it.
    #[error("unknown quality preset")]
    InvalidPreset {
        /// Token supplied by the caller.
        token: String,
    },
    /// Another live run already holds this request id.
    #[error("request id already in use")]
    RequestIdInUse,
    /// Request body could not be parsed.
    #[error("malformed upload")]
    BadRequest {
        /// Static reason for the rejection.
        reason: &'static str,
        /// Transport-provided detail.
        detail: Option<String>,
    },
    /// Staging store failed for reasons unrelated to the caller.
    #[error("compression failed")]
    Staging {
        /// Underlying staging error.
        #[source]
        source: StagingError,
    },
    /// Engine failed to produce an output.
    #[error("compression failed")]
    EngineFailed {
        /// Exit details for diagnostics.
        exit: ExitInfo,
    },
    /// Engine or request exceeded its time budget.
    #[error("compression failed")]
    Timeout {
        /// Budget that was exceeded.
        limit: Duration,
    },
    /// The run state machine refused a move.
    #[error("compression failed")]
    Internal {
        /// Rejected transition.
        #[source]
        source: TransitionError,
    },
}

impl PipelineError {
    /// Machine-readable error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PayloadMissing => "payload_missing",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidPreset { .. } => "invalid_preset",
            Self::BadRequest { .. } => "bad_request",
            Self::RequestIdInUse => "request_id_in_use",
            Self::Staging { .. } => "staging_failed",
            Self::EngineFailed { .. } => "engine_failed",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal",
        }
    }

    /// HTTP status the error maps to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::PayloadMissing | Self::InvalidPreset { .. } | Self::BadRequest { .. } => 400,
            Self::RequestIdInUse => 409,
            Self::PayloadTooLarge { .. } => 413,
            Self::Staging { .. }
            | Self::EngineFailed { .. }
            | Self::Timeout { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Whether the error was caused by the caller's request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<StagingError> for PipelineError {
    fn from(error: StagingError) -> Self {
        match error {
            StagingError::PayloadTooLarge { limit } => Self::PayloadTooLarge { limit },
            StagingError::Payload {
                source: PayloadReadError::Malformed { detail },
            } => Self::BadRequest {
                reason: "malformed_multipart",
                detail: Some(detail),
            },
            StagingError::PathCollision { .. } => Self::RequestIdInUse,
            other => Self::Staging { source: other },
        }
    }
}

impl From<TransitionError> for PipelineError {
    fn from(source: TransitionError) -> Self {
        Self::Internal { source }
    }
}

impl From<InvokeError> for PipelineError {
    fn from(error: InvokeError) -> Self {
        match error {
            InvokeError::Timeout { limit } => Self::Timeout { limit },
            InvokeError::EngineFailed { exit } => Self::EngineFailed { exit },
        }
    }
}
