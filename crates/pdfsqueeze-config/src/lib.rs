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

//! Environment-driven configuration for the pdfsqueeze service.
//!
//! Layout: `model.rs` (typed config models and defaults), `validate.rs`
//! (parsing and cross-field validation), `loader.rs` (environment lookup).

pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    ENV_BIND_ADDR, ENV_ENGINE_ARGS, ENV_ENGINE_BIN, ENV_ENGINE_TIMEOUT_SECS, ENV_LOG_FORMAT,
    ENV_LOG_LEVEL, ENV_MAX_CONCURRENT_JOBS, ENV_MAX_UPLOAD_BYTES, ENV_PRESET_POLICY,
    ENV_PROGRESS_TICK_MS, ENV_PURGE_STALE_SECS, ENV_REQUEST_TIMEOUT_SECS, ENV_STAGING_DIR,
};
pub use model::{
    DEFAULT_ENGINE_ARGS, DEFAULT_ENGINE_PROGRAM, DEFAULT_MAX_UPLOAD_BYTES, EngineConfig,
    INPUT_PLACEHOLDER, LogSettings, LogStyle, OUTPUT_PLACEHOLDER, PRESET_PLACEHOLDER,
    PresetPolicy, ServiceConfig, StagingConfig,
};
