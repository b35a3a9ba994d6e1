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

//! Shared test helpers used across pdfsqueeze suites.
//! Layout: engine.rs (scripted fake engines), fixtures.rs (payloads and multipart bodies).

pub mod engine;
pub mod fixtures;

pub use engine::{FakeEngine, FakeEngineBehavior};
pub use fixtures::{MultipartBody, sample_pdf, sample_png};
