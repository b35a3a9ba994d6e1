//! Value parsing and cross-field validation.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::{
    ENV_ENGINE_ARGS, ENV_ENGINE_BIN, ENV_ENGINE_TIMEOUT_SECS, ENV_LOG_LEVEL,
    ENV_MAX_CONCURRENT_JOBS, ENV_MAX_UPLOAD_BYTES, ENV_REQUEST_TIMEOUT_SECS, ENV_STAGING_DIR,
};
use crate::model::{INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER, PRESET_PLACEHOLDER, ServiceConfig};

pub(crate) fn parse_u64(field: &'static str, raw: &str) -> ConfigResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(field, "must be an unsigned integer", Some(raw)))
}

pub(crate) fn parse_usize(field: &'static str, raw: &str) -> ConfigResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::invalid(field, "must be an unsigned integer", Some(raw)))
}

pub(crate) fn parse_secs(field: &'static str, raw: &str) -> ConfigResult<Duration> {
    parse_u64(field, raw).map(Duration::from_secs)
}

pub(crate) fn parse_millis(field: &'static str, raw: &str) -> ConfigResult<Duration> {
    let millis = parse_u64(field, raw)?;
    if millis == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero", Some(raw)));
    }
    Ok(Duration::from_millis(millis))
}

pub(crate) fn parse_socket_addr(field: &'static str, raw: &str) -> ConfigResult<SocketAddr> {
    raw.trim()
        .parse::<SocketAddr>()
        .map_err(|_| ConfigError::invalid(field, "must be a socket address", Some(raw)))
}

pub(crate) fn parse_keyword<T: FromStr>(
    field: &'static str,
    raw: &str,
    reason: &'static str,
) -> ConfigResult<T> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::invalid(field, reason, Some(raw)))
}

pub(crate) fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

impl ServiceConfig {
    /// Check invariants that span several fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.staging.max_upload_bytes == 0 {
            return Err(ConfigError::invalid(
                ENV_MAX_UPLOAD_BYTES,
                "must be greater than zero",
                Some("0"),
            ));
        }
        if self.staging.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                ENV_STAGING_DIR,
                "must not be empty",
                None::<String>,
            ));
        }
        if self.engine.program.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                ENV_ENGINE_BIN,
                "must not be empty",
                None::<String>,
            ));
        }
        for placeholder in [INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER] {
            if !self.engine.args.iter().any(|arg| arg.contains(placeholder)) {
                return Err(ConfigError::invalid(
                    ENV_ENGINE_ARGS,
                    "template must reference both {input} and {output}",
                    Some(self.engine.args.join(" ")),
                ));
            }
        }
        // The preset expands to several arguments, so it must stand alone.
        if !self.engine.args.iter().any(|arg| arg == PRESET_PLACEHOLDER) {
            return Err(ConfigError::invalid(
                ENV_ENGINE_ARGS,
                "template must carry {preset} as its own argument",
                Some(self.engine.args.join(" ")),
            ));
        }
        if self.engine.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                ENV_MAX_CONCURRENT_JOBS,
                "must be at least 1",
                Some("0"),
            ));
        }
        if self.engine.timeout.is_zero() {
            return Err(ConfigError::invalid(
                ENV_ENGINE_TIMEOUT_SECS,
                "must be greater than zero",
                Some("0"),
            ));
        }
        if self.engine.timeout > self.request_timeout {
            return Err(ConfigError::Conflict {
                field: ENV_ENGINE_TIMEOUT_SECS,
                other: ENV_REQUEST_TIMEOUT_SECS,
                reason: "engine timeout must not exceed the request timeout",
            });
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid(
                ENV_LOG_LEVEL,
                "must not be empty",
                None::<String>,
            ));
        }
        Ok(())
    }
}
