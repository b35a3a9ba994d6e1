#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Managed compression pipeline.
//!
//! A request flows through [`StagingStore`] (payload to a unique on-disk path),
//! [`PresetResolver`] (quality token to engine profile), an [`Invoker`]
//! (external engine under a hard timeout), and back out as a
//! [`CompressedOutput`]. [`Orchestrator`] sequences the steps and owns the
//! [`PipelineRun`] state machine; [`ProgressReporter`] publishes progress on
//! the event bus.

pub mod document;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod preset;
pub mod progress;
pub mod run;
pub mod staging;

pub use document::DocumentKind;
pub use error::{
    ExitInfo, InvokeError, InvokeResult, PayloadReadError, PipelineError, PipelineResult,
    StagingError, StagingResult, TransitionError,
};
pub use invoker::{EngineInvoker, InvocationReport, Invoker, resolve_program};
pub use orchestrator::{CompressedOutput, Orchestrator, TransformRequest};
pub use preset::{InvocationProfile, Preset, PresetResolver};
pub use progress::{EngineTicker, ProgressReporter};
pub use run::{FailureKind, PipelineRun, RunState, RunSummary};
pub use staging::{ReleaseReport, StagedPayload, StagedRun, StagingStore};
