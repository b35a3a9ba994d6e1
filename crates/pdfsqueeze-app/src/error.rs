//! # Design
//!
//! - Centralize application-level errors for bootstrap and serving.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: pdfsqueeze_config::ConfigError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: pdfsqueeze_api::ApiServerError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: pdfsqueeze_telemetry::TelemetryError,
    },
    /// Staging store operations failed.
    #[error("staging operation failed")]
    Staging {
        /// Operation identifier.
        operation: &'static str,
        /// Source staging error.
        source: pdfsqueeze_pipeline::StagingError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: pdfsqueeze_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: pdfsqueeze_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: pdfsqueeze_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn staging(
        operation: &'static str,
        source: pdfsqueeze_pipeline::StagingError,
    ) -> Self {
        Self::Staging { operation, source }
    }
}
