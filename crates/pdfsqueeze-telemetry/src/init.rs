//! Global tracing subscriber setup.

use once_cell::sync::Lazy;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Filter used when neither `RUST_LOG` nor configuration supplies one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Runtime variable that overrides the compiled-in build identifier.
pub const BUILD_SHA_ENV: &str = "PDFSQUEEZE_BUILD_SHA";

/// Chatty dependencies capped below the service's own level.
const QUIET_DIRECTIVES: &[&str] = &["hyper=warn", "h2=warn", "tower_http=info"];

static BUILD_SHA: Lazy<String> = Lazy::new(|| {
    std::env::var(BUILD_SHA_ENV)
        .ok()
        .filter(|sha| !sha.trim().is_empty())
        .or_else(|| option_env!("PDFSQUEEZE_BUILD_SHA").map(str::to_string))
        .unwrap_or_else(|| "dev".to_string())
});

/// Build identifier stamped on the application span and health output.
#[must_use]
pub fn build_sha() -> &'static str {
    &BUILD_SHA
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig<'a> {
    /// Default filter directive, e.g. `info` or `pdfsqueeze_pipeline=debug`.
    pub level: &'a str,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, span fields flattened in.
    Json,
    /// Human-readable single-line output.
    Pretty,
}

impl LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set.
///
/// # Errors
///
/// Returns [`TelemetryError::SubscriberInstall`] if a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config.level));
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
    };
    installed.map_err(|source| TelemetryError::SubscriberInstall { source })
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![level.trim()];
        directives.extend_from_slice(QUIET_DIRECTIVES);
        EnvFilter::new(directives.join(","))
    })
}
