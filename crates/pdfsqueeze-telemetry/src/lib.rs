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

//! Telemetry primitives shared across the pdfsqueeze workspace.
//!
//! Logging setup, request-scoped context, request-id layers, and the Prometheus
//! registry live here so the pipeline and HTTP surface report consistently.

pub mod context;
pub mod error;
pub mod init;
pub mod layers;
pub mod metrics;

pub use context::{RequestContext, app_span, current_request, with_request_context};
pub use error::{Result, TelemetryError};
pub use init::{BUILD_SHA_ENV, DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use layers::{
    REQUEST_ID_HEADER, parse_request_id, propagate_request_id_layer, set_request_id_layer,
};
pub use metrics::{Metrics, MetricsSnapshot, RunOutcomeLabel};
