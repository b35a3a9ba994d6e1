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

//! HTTP surface for the pdfsqueeze compression service.
//!
//! Routes:
//! - `POST /compress-pdf?quality=` multipart upload, compressed attachment back
//! - `GET /v1/progress/{request_id}` per-run server-sent events
//! - `GET /v1/presets` quality catalogue
//! - `GET /health`, `GET /health/full`, `GET /metrics`

pub mod error;
pub mod http;
mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
