//! Error types for telemetry operations.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised by telemetry helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A collector could not be built or registered.
    #[error("failed to set up metric")]
    Metric {
        /// Metric name.
        name: &'static str,
        /// Step that failed (`build` or `register`).
        step: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// The registry could not be rendered as text.
    #[error("failed to render metrics")]
    Render {
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn metric_errors_keep_name_and_source() {
        let err = TelemetryError::Metric {
            name: "engine_duration_seconds",
            step: "build",
            source: PrometheusError::Msg("buckets".to_string()),
        };
        assert_eq!(err.to_string(), "failed to set up metric");
        assert!(matches!(
            err,
            TelemetryError::Metric {
                name: "engine_duration_seconds",
                step: "build",
                ..
            }
        ));
        assert!(err.source().is_some());

        let render = TelemetryError::Render {
            source: PrometheusError::Msg("encode".to_string()),
        };
        assert_eq!(render.to_string(), "failed to render metrics");
    }
}
