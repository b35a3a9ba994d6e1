//! Request-scoped run state machine.
//!
//! # Design
//! - Moves are `Received -> Staged -> Invoking -> Succeeded`, plus any
//!   non-terminal state to `Failed`. Anything else is a [`TransitionError`].
//! - Every move is logged and published on the event bus.
//! - A run dropped before reaching a terminal state records `Failed(Cancelled)`
//!   and releases its staged paths.

use std::fmt;

use pdfsqueeze_events::{Event, EventBus, RunPhase};
use pdfsqueeze_telemetry::{Metrics, RunOutcomeLabel};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, TransitionError};
use crate::preset::Preset;
use crate::progress::ProgressReporter;
use crate::staging::{ReleaseReport, StagedRun};

/// Why a run ended without output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No file in the request.
    PayloadMissing,
    /// Upload exceeded the ceiling.
    PayloadTooLarge,
    /// Unknown preset under the reject policy.
    InvalidPreset,
    /// Malformed request body.
    BadRequest,
    /// Request id held by another live run.
    RequestIdInUse,
    /// Staging store failure.
    Staging,
    /// Engine failure.
    EngineFailed,
    /// Engine or request timeout.
    Timeout,
    /// Run state machine misuse.
    Internal,
    /// The run was abandoned, usually because the client went away.
    Cancelled,
}

impl FailureKind {
    /// Machine-readable name, matching [`PipelineError::kind`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PayloadMissing => "payload_missing",
            Self::PayloadTooLarge => "payload_too_large",
            Self::InvalidPreset => "invalid_preset",
            Self::BadRequest => "bad_request",
            Self::RequestIdInUse => "request_id_in_use",
            Self::Staging => "staging_failed",
            Self::EngineFailed => "engine_failed",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
        }
    }

    /// Outcome label recorded in `pipeline_runs_total`.
    #[must_use]
    pub const fn outcome(self) -> RunOutcomeLabel {
        match self {
            Self::PayloadMissing
            | Self::PayloadTooLarge
            | Self::InvalidPreset
            | Self::BadRequest
            | Self::RequestIdInUse => RunOutcomeLabel::Rejected,
            Self::Staging | Self::Internal => RunOutcomeLabel::StagingFailed,
            Self::EngineFailed => RunOutcomeLabel::EngineFailed,
            Self::Timeout => RunOutcomeLabel::Timeout,
            Self::Cancelled => RunOutcomeLabel::Cancelled,
        }
    }
}

impl From<&PipelineError> for FailureKind {
    fn from(error: &PipelineError) -> Self {
        match error {
            PipelineError::PayloadMissing => Self::PayloadMissing,
            PipelineError::PayloadTooLarge { .. } => Self::PayloadTooLarge,
            PipelineError::InvalidPreset { .. } => Self::InvalidPreset,
            PipelineError::BadRequest { .. } => Self::BadRequest,
            PipelineError::RequestIdInUse => Self::RequestIdInUse,
            PipelineError::Staging { .. } => Self::Staging,
            PipelineError::EngineFailed { .. } => Self::EngineFailed,
            PipelineError::Timeout { .. } => Self::Timeout,
            PipelineError::Internal { .. } => Self::Internal,
        }
    }
}

/// Current state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Request arrived.
    Received,
    /// Payload staged.
    Staged,
    /// Engine running.
    Invoking,
    /// Output produced.
    Succeeded,
    /// Run ended without output.
    Failed(FailureKind),
}

impl RunState {
    /// Phase published on the event bus.
    #[must_use]
    pub const fn phase(self) -> RunPhase {
        match self {
            Self::Received => RunPhase::Received,
            Self::Staged => RunPhase::Staged,
            Self::Invoking => RunPhase::Invoking,
            Self::Succeeded => RunPhase::Succeeded,
            Self::Failed(_) => RunPhase::Failed,
        }
    }

    /// Whether the state ends the run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.phase().is_terminal()
    }

    const fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Staged)
                | (Self::Staged, Self::Invoking)
                | (Self::Invoking, Self::Succeeded)
                | (Self::Received | Self::Staged | Self::Invoking, Self::Failed(_))
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed({})", kind.as_str()),
            other => f.write_str(match other.phase() {
                RunPhase::Received => "received",
                RunPhase::Staged => "staged",
                RunPhase::Invoking => "invoking",
                RunPhase::Succeeded => "succeeded",
                RunPhase::Failed => "failed",
            }),
        }
    }
}

/// Sizes reported when a run succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Preset the engine ran with.
    pub preset: Preset,
    /// Staged input size.
    pub input_bytes: u64,
    /// Produced output size.
    pub output_bytes: u64,
}

pub(crate) fn emit(events: &EventBus, metrics: &Metrics, event: Event) {
    metrics.inc_event(event.kind());
    let _ = events.publish(event);
}

/// One request's path through the pipeline.
pub struct PipelineRun {
    request_id: Uuid,
    state: RunState,
    staged: Option<StagedRun>,
    events: EventBus,
    metrics: Metrics,
}

impl PipelineRun {
    /// Start a run in [`RunState::Received`].
    #[must_use]
    pub fn new(request_id: Uuid, events: EventBus, metrics: Metrics) -> Self {
        let run = Self {
            request_id,
            state: RunState::Received,
            staged: None,
            events,
            metrics,
        };
        debug!(request_id = %request_id, state = %run.state, "run received");
        run.publish_state();
        run
    }

    /// Request the run belongs to.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Hand the staged paths to the run; they are released with it.
    pub fn attach(&mut self, staged: StagedRun) {
        self.staged = Some(staged);
    }

    /// `Received -> Staged`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the run is not in `Received`.
    pub fn mark_staged(&mut self) -> Result<(), TransitionError> {
        self.transition(RunState::Staged)?;
        self.publish_state();
        Ok(())
    }

    /// `Staged -> Invoking`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the run is not in `Staged`.
    pub fn mark_invoking(&mut self) -> Result<(), TransitionError> {
        self.transition(RunState::Invoking)?;
        self.publish_state();
        Ok(())
    }

    /// `Invoking -> Succeeded`. Publishes the new state, then 100% on
    /// `progress`, then `run_completed`. Staged paths stay alive until the run
    /// is dropped or [`Self::release`] is called, so the output can be streamed.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the run is not in `Invoking`; nothing
    /// is published in that case.
    pub fn succeed(
        &mut self,
        summary: RunSummary,
        progress: &ProgressReporter,
    ) -> Result<(), TransitionError> {
        self.transition(RunState::Succeeded)?;
        self.publish_state();
        progress.complete();
        emit(
            &self.events,
            &self.metrics,
            Event::RunCompleted {
                request_id: self.request_id,
                preset: summary.preset.as_str().to_string(),
                input_bytes: summary.input_bytes,
                output_bytes: summary.output_bytes,
            },
        );
        self.metrics.inc_pipeline_run(RunOutcomeLabel::Succeeded);
        info!(
            request_id = %self.request_id,
            preset = %summary.preset,
            input_bytes = summary.input_bytes,
            output_bytes = summary.output_bytes,
            outcome = "succeeded",
            "run succeeded"
        );
        Ok(())
    }

    /// Any non-terminal state `-> Failed`. Staged paths are released before
    /// the failure is published.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the run is already terminal.
    pub fn fail(&mut self, error: &PipelineError) -> Result<(), TransitionError> {
        let kind = FailureKind::from(error);
        self.transition(RunState::Failed(kind))?;
        self.release();
        self.publish_failure(kind, &error.to_string());
        if error.is_client_error() {
            info!(request_id = %self.request_id, outcome = kind.as_str(), error = %error, "run rejected");
        } else {
            warn!(request_id = %self.request_id, outcome = kind.as_str(), error = %error, "run failed");
        }
        Ok(())
    }

    /// Release the staged paths now. Later calls are no-ops.
    pub fn release(&mut self) -> ReleaseReport {
        self.staged
            .as_mut()
            .map(StagedRun::release)
            .unwrap_or_default()
    }

    fn transition(&mut self, next: RunState) -> Result<(), TransitionError> {
        if !self.state.allows(next) {
            warn!(
                request_id = %self.request_id,
                from = %self.state,
                to = %next,
                "illegal run transition"
            );
            return Err(TransitionError {
                from: self.state.phase(),
                to: next.phase(),
            });
        }
        debug!(request_id = %self.request_id, from = %self.state, to = %next, "run transition");
        self.state = next;
        Ok(())
    }

    fn publish_state(&self) {
        emit(
            &self.events,
            &self.metrics,
            Event::RunStateChanged {
                request_id: self.request_id,
                state: self.state.phase(),
            },
        );
    }

    fn publish_failure(&self, kind: FailureKind, message: &str) {
        self.publish_state();
        emit(
            &self.events,
            &self.metrics,
            Event::RunFailed {
                request_id: self.request_id,
                kind: kind.as_str().to_string(),
                message: message.to_string(),
            },
        );
        self.metrics.inc_pipeline_run(kind.outcome());
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let from = self.state;
        self.state = RunState::Failed(FailureKind::Cancelled);
        self.release();
        warn!(
            request_id = %self.request_id,
            from = %from,
            outcome = FailureKind::Cancelled.as_str(),
            "run abandoned before completion"
        );
        self.publish_failure(FailureKind::Cancelled, "request cancelled");
    }
}
