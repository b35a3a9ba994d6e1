//! Environment lookup for [`ServiceConfig`].

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigResult;
use crate::model::ServiceConfig;
use crate::validate::{
    parse_keyword, parse_millis, parse_secs, parse_socket_addr, parse_u64, parse_usize,
    split_args,
};

/// Listen address.
pub const ENV_BIND_ADDR: &str = "PDFSQUEEZE_BIND_ADDR";
/// Staging base directory.
pub const ENV_STAGING_DIR: &str = "PDFSQUEEZE_STAGING_DIR";
/// Upload ceiling in bytes.
pub const ENV_MAX_UPLOAD_BYTES: &str = "PDFSQUEEZE_MAX_UPLOAD_BYTES";
/// Startup purge threshold in seconds (`0` disables).
pub const ENV_PURGE_STALE_SECS: &str = "PDFSQUEEZE_PURGE_STALE_SECS";
/// Engine program.
pub const ENV_ENGINE_BIN: &str = "PDFSQUEEZE_ENGINE_BIN";
/// Whitespace-separated engine argument template.
pub const ENV_ENGINE_ARGS: &str = "PDFSQUEEZE_ENGINE_ARGS";
/// Engine timeout in seconds.
pub const ENV_ENGINE_TIMEOUT_SECS: &str = "PDFSQUEEZE_ENGINE_TIMEOUT_SECS";
/// Overall request timeout in seconds.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "PDFSQUEEZE_REQUEST_TIMEOUT_SECS";
/// Engine concurrency bound.
pub const ENV_MAX_CONCURRENT_JOBS: &str = "PDFSQUEEZE_MAX_CONCURRENT_JOBS";
/// `fallback` or `reject`.
pub const ENV_PRESET_POLICY: &str = "PDFSQUEEZE_PRESET_POLICY";
/// Heuristic progress tick in milliseconds.
pub const ENV_PROGRESS_TICK_MS: &str = "PDFSQUEEZE_PROGRESS_TICK_MS";
/// Default log filter.
pub const ENV_LOG_LEVEL: &str = "PDFSQUEEZE_LOG_LEVEL";
/// `json` or `pretty`.
pub const ENV_LOG_FORMAT: &str = "PDFSQUEEZE_LOG_FORMAT";

impl ServiceConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError`] when a variable is malformed or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset and blank variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError`] when a variable is malformed or the
    /// resulting configuration is inconsistent.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(ENV_BIND_ADDR) {
            config.bind_addr = parse_socket_addr(ENV_BIND_ADDR, &raw)?;
        }
        if let Some(raw) = get(ENV_STAGING_DIR) {
            config.staging.base_dir = PathBuf::from(raw.trim());
        }
        if let Some(raw) = get(ENV_MAX_UPLOAD_BYTES) {
            config.staging.max_upload_bytes = parse_u64(ENV_MAX_UPLOAD_BYTES, &raw)?;
        }
        if let Some(raw) = get(ENV_PURGE_STALE_SECS) {
            let secs = parse_u64(ENV_PURGE_STALE_SECS, &raw)?;
            config.staging.purge_stale_after = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = get(ENV_ENGINE_BIN) {
            config.engine.program = PathBuf::from(raw.trim());
        }
        if let Some(raw) = get(ENV_ENGINE_ARGS) {
            config.engine.args = split_args(&raw);
        }
        if let Some(raw) = get(ENV_ENGINE_TIMEOUT_SECS) {
            config.engine.timeout = parse_secs(ENV_ENGINE_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = get(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout = parse_secs(ENV_REQUEST_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_CONCURRENT_JOBS) {
            config.engine.max_concurrent = parse_usize(ENV_MAX_CONCURRENT_JOBS, &raw)?;
        }
        if let Some(raw) = get(ENV_PRESET_POLICY) {
            config.preset_policy =
                parse_keyword(ENV_PRESET_POLICY, &raw, "must be 'fallback' or 'reject'")?;
        }
        if let Some(raw) = get(ENV_PROGRESS_TICK_MS) {
            config.progress_tick = parse_millis(ENV_PROGRESS_TICK_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_LOG_LEVEL) {
            config.logging.level = raw.trim().to_string();
        }
        if let Some(raw) = get(ENV_LOG_FORMAT) {
            config.logging.format = Some(parse_keyword(
                ENV_LOG_FORMAT,
                &raw,
                "must be 'json' or 'pretty'",
            )?);
        }

        config.validate()?;
        debug!(
            bind_addr = %config.bind_addr,
            staging_dir = %config.staging.base_dir.display(),
            engine = %config.engine.program.display(),
            max_concurrent = config.engine.max_concurrent,
            preset_policy = %config.preset_policy,
            "service configuration loaded"
        );
        Ok(config)
    }
}
