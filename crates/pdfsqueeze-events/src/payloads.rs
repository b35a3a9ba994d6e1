//! Event payload types carried between the pipeline and its observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to each event emitted on the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Number of finished runs whose terminal event the bus remembers.
pub const DEFAULT_FINISHED_CAPACITY: usize = 4_096;

/// Typed events describing the lifecycle of a compression run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Progress update for a run, as a percentage.
    Progress {
        /// Run the update belongs to.
        request_id: Uuid,
        /// Completion percentage in `0..=100`.
        percent: u8,
        /// Coarse phase the percentage was derived from.
        phase: ProgressPhase,
    },
    /// The run moved into a new lifecycle state.
    RunStateChanged {
        /// Run whose state changed.
        request_id: Uuid,
        /// State entered.
        state: RunPhase,
    },
    /// The run produced an output artifact.
    RunCompleted {
        /// Completed run.
        request_id: Uuid,
        /// Preset the engine ran with.
        preset: String,
        /// Size of the staged input.
        input_bytes: u64,
        /// Size of the produced output.
        output_bytes: u64,
    },
    /// The run ended without an output artifact.
    RunFailed {
        /// Failed run.
        request_id: Uuid,
        /// Machine-readable failure kind.
        kind: String,
        /// Client-safe description.
        message: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for SSE consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::RunStateChanged { .. } => "run_state_changed",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
        }
    }

    /// Run the event belongs to.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::Progress { request_id, .. }
            | Self::RunStateChanged { request_id, .. }
            | Self::RunCompleted { request_id, .. }
            | Self::RunFailed { request_id, .. } => *request_id,
        }
    }

    /// Whether no further events follow for this run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunFailed { .. })
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier assigned by the bus.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

/// Phase a progress percentage was derived from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Payload bytes are still arriving (0-50%).
    Uploading,
    /// The engine is running (50-95%).
    Compressing,
    /// Output is ready (100%).
    Done,
}

/// Lifecycle states of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Request arrived; nothing staged yet.
    Received,
    /// Payload written to staging within the size limit.
    Staged,
    /// Engine subprocess running.
    Invoking,
    /// Output produced.
    Succeeded,
    /// Run ended without output.
    Failed,
}

impl RunPhase {
    /// Whether the phase ends the run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() -> Result<(), serde_json::Error> {
        let id = Uuid::from_u128(7);
        let event = Event::Progress {
            request_id: id,
            percent: 42,
            phase: ProgressPhase::Compressing,
        };
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["type"], "progress");
        assert_eq!(json["phase"], "compressing");
        assert_eq!(json["percent"], 42);
        assert_eq!(event.request_id(), id);
        assert!(!event.is_terminal());
        Ok(())
    }

    #[test]
    fn terminal_events_are_flagged() {
        let id = Uuid::from_u128(1);
        let failed = Event::RunFailed {
            request_id: id,
            kind: "engine_failed".into(),
            message: "compression failed".into(),
        };
        assert!(failed.is_terminal());
        assert_eq!(failed.kind(), "run_failed");
        assert!(RunPhase::Failed.is_terminal());
        assert!(!RunPhase::Invoking.is_terminal());
    }
}
