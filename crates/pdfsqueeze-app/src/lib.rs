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

//! pdfsqueeze service bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (config, logging, pipeline and API wiring),
//! `error.rs` (bootstrap failures).

/// Service bootstrap and environment loading.
pub mod bootstrap;
/// Application error types.
pub mod error;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
