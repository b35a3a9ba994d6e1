//! HTTP surface modules (router, handlers, middleware).

/// Compression upload handler.
pub mod compress;
/// Shared constants and header names.
pub mod constants;
/// Plain-text error responses.
pub mod errors;
/// Health and metrics endpoints.
pub mod health;
/// Preset catalogue.
pub mod presets;
/// Per-run progress over server-sent events.
pub mod progress;
/// Request id normalisation.
pub mod request_id;
/// Router construction and server host.
pub mod router;
/// Metrics middleware for HTTP requests.
pub mod telemetry;
