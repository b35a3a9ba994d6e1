//! Typed configuration models and their defaults.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5001;
/// Default upload ceiling (200 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;
/// Default engine program.
pub const DEFAULT_ENGINE_PROGRAM: &str = "gs";
/// Default engine argument template (Ghostscript `pdfwrite`).
pub const DEFAULT_ENGINE_ARGS: &[&str] = &[
    "-sDEVICE=pdfwrite",
    "-dCompatibilityLevel=1.4",
    PRESET_PLACEHOLDER,
    "-dNOPAUSE",
    "-dQUIET",
    "-dBATCH",
    "-sOutputFile={output}",
    INPUT_PLACEHOLDER,
];
/// Token replaced by the staged input path.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Token replaced by the allocated output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Standalone token spliced with the preset's engine arguments.
pub const PRESET_PLACEHOLDER: &str = "{preset}";

pub(crate) const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(600);
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
pub(crate) const DEFAULT_PURGE_STALE_AFTER: Duration = Duration::from_secs(3600);
pub(crate) const DEFAULT_PROGRESS_TICK: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";
const STAGING_DIR_NAME: &str = "pdfsqueeze";

/// Fully resolved service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Socket address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Overall wall-clock budget for a single request.
    pub request_timeout: Duration,
    /// Staging store settings.
    pub staging: StagingConfig,
    /// External engine settings.
    pub engine: EngineConfig,
    /// How unknown quality tokens are treated.
    pub preset_policy: PresetPolicy,
    /// Interval between heuristic progress ticks while the engine runs.
    pub progress_tick: Duration,
    /// Logging defaults; `RUST_LOG` still wins at runtime.
    pub logging: LogSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            staging: StagingConfig::default(),
            engine: EngineConfig::default(),
            preset_policy: PresetPolicy::default(),
            progress_tick: DEFAULT_PROGRESS_TICK,
            logging: LogSettings::default(),
        }
    }
}

/// Where and how request payloads are staged on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    /// Base directory holding per-request files.
    pub base_dir: PathBuf,
    /// Upload ceiling in bytes.
    pub max_upload_bytes: u64,
    /// Startup purge threshold for leftover files; `None` disables the purge.
    pub purge_stale_after: Option<Duration>,
}

impl StagingConfig {
    /// Build a staging configuration rooted at `base_dir` with default limits.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join(STAGING_DIR_NAME),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            purge_stale_after: Some(DEFAULT_PURGE_STALE_AFTER),
        }
    }
}

/// Command template and limits for the external compression engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Program to execute (resolved through `PATH` when relative).
    pub program: PathBuf,
    /// Argument template tokens.
    pub args: Vec<String>,
    /// Hard timeout measured from subprocess start.
    pub timeout: Duration,
    /// Upper bound on simultaneously running engine subprocesses.
    pub max_concurrent: usize,
}

impl EngineConfig {
    /// Build an engine configuration for `program` with the given template tokens.
    #[must_use]
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_ENGINE_PROGRAM),
            args: DEFAULT_ENGINE_ARGS.iter().map(|arg| (*arg).to_string()).collect(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
            max_concurrent: default_parallelism(),
        }
    }
}

pub(crate) fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(2, NonZeroUsize::get)
}

/// Treatment of quality tokens that do not name a known preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetPolicy {
    /// Unknown tokens resolve to the default preset (logged at warn).
    #[default]
    Fallback,
    /// Unknown tokens are rejected with a client error.
    Reject,
}

impl PresetPolicy {
    /// Stable configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fallback => "fallback",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for PresetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresetPolicy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fallback" | "fail-open" | "open" => Ok(Self::Fallback),
            "reject" | "fail-closed" | "closed" => Ok(Self::Reject),
            _ => Err(()),
        }
    }
}

/// Log output style requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStyle {
    /// Structured JSON lines.
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

impl FromStr for LogStyle {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(()),
        }
    }
}

/// Logging defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Default filter directive.
    pub level: String,
    /// Output style; `None` lets telemetry infer from the build profile.
    pub format: Option<LogStyle>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: None,
        }
    }
}
