//! Quality presets and their engine invocation profiles.

use std::fmt;

use pdfsqueeze_config::PresetPolicy;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Closed set of compression-strength tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Maximum reduction (~72 DPI).
    Screen,
    /// Balanced reduction (~150 DPI).
    Ebook,
    /// Minimum reduction (~300 DPI).
    Printer,
}

impl Preset {
    /// Every preset, strongest reduction first.
    pub const ALL: [Self; 3] = [Self::Screen, Self::Ebook, Self::Printer];
    /// Preset used when none is requested.
    pub const DEFAULT: Self = Self::Ebook;

    /// Token accepted in the `quality` parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::Ebook => "ebook",
            Self::Printer => "printer",
        }
    }

    /// Approximate output resolution the preset targets.
    #[must_use]
    pub const fn resolution_hint(self) -> u32 {
        match self {
            Self::Screen => 72,
            Self::Ebook => 150,
            Self::Printer => 300,
        }
    }

    /// Short human description for quality pickers.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Screen => "Smallest file, screen-only quality",
            Self::Ebook => "Balanced size and quality",
            Self::Printer => "Largest file, print quality",
        }
    }

    /// Parse a caller-supplied token.
    ///
    /// Matching ignores case and surrounding whitespace and accepts a leading `/`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let normalized = token.trim();
        let normalized = normalized.strip_prefix('/').unwrap_or(normalized);
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(normalized))
    }

    fn engine_args(self) -> Vec<String> {
        vec![format!("-dPDFSETTINGS=/{}", self.as_str())]
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable engine parameters for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationProfile {
    /// Preset the profile was derived from.
    pub preset: Preset,
    /// Semantic strength class (DPI-equivalent).
    pub resolution_hint: u32,
    /// Engine-specific arguments spliced at `{preset}`.
    pub engine_args: Vec<String>,
}

impl From<Preset> for InvocationProfile {
    fn from(preset: Preset) -> Self {
        Self {
            preset,
            resolution_hint: preset.resolution_hint(),
            engine_args: preset.engine_args(),
        }
    }
}

/// Maps quality tokens to invocation profiles under a configured policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresetResolver {
    policy: PresetPolicy,
}

impl PresetResolver {
    /// Build a resolver for the given policy.
    #[must_use]
    pub const fn new(policy: PresetPolicy) -> Self {
        Self { policy }
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> PresetPolicy {
        self.policy
    }

    /// Resolve an optional token.
    ///
    /// An absent or blank token yields the default preset under either policy.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPreset`] for unknown tokens when the
    /// policy is [`PresetPolicy::Reject`].
    pub fn resolve(&self, token: Option<&str>) -> PipelineResult<InvocationProfile> {
        let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) else {
            debug!(preset = %Preset::DEFAULT, "no quality requested; using default preset");
            return Ok(Preset::DEFAULT.into());
        };

        if let Some(preset) = Preset::parse(token) {
            return Ok(preset.into());
        }

        match self.policy {
            PresetPolicy::Fallback => {
                warn!(
                    token = token,
                    fallback = %Preset::DEFAULT,
                    "unknown quality preset; falling back to default"
                );
                Ok(Preset::DEFAULT.into())
            }
            PresetPolicy::Reject => Err(PipelineError::InvalidPreset {
                token: token.to_string(),
            }),
        }
    }
}
