//! Model tiers and complexity levels.
//!
//! A [`ModelTier`] is an abstract capability band (haiku/sonnet/opus)
//! independent of provider brand; each tier maps to one concrete model id
//! through [`crate::aliases::ModelAliases`]. A [`ComplexityLevel`] summarizes
//! request difficulty and drives the default tier choice.
//!
//! The level-to-tier mapping lives here and nowhere else -- both the
//! selector and the signal layers go through [`ModelTier::for_level`] /
//! [`ComplexityLevel::for_tier`].

use serde::{Deserialize, Serialize};

// ── ModelTier ──────────────────────────────────────────────────────────

/// Abstract capability band, strictly ordered `Haiku < Sonnet < Opus`.
///
/// The ordering is load-bearing: escalation moves up, budget downgrades
/// move down, and comparisons like `tier > ModelTier::Haiku` appear
/// throughout the routing core.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheapest, fastest band for simple requests.
    Haiku,
    /// Balanced band for standard requests.
    Sonnet,
    /// Most capable band for complex requests.
    Opus,
}

impl ModelTier {
    /// All tiers, cheapest first.
    pub const ALL: [ModelTier; 3] = [ModelTier::Haiku, ModelTier::Sonnet, ModelTier::Opus];

    /// Lowercase tier name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Haiku => "haiku",
            ModelTier::Sonnet => "sonnet",
            ModelTier::Opus => "opus",
        }
    }

    /// The tier that serves a given complexity level.
    pub fn for_level(level: ComplexityLevel) -> Self {
        match level {
            ComplexityLevel::Simple => ModelTier::Haiku,
            ComplexityLevel::Standard => ModelTier::Sonnet,
            ComplexityLevel::Complex => ModelTier::Opus,
        }
    }

    /// Infer a tier from a model name.
    ///
    /// Matches on the "haiku" / "opus" substrings; anything else is
    /// treated as sonnet-class. Used when a caller-requested model is not
    /// present in the tier table.
    pub fn from_model_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("haiku") {
            ModelTier::Haiku
        } else if lower.contains("opus") {
            ModelTier::Opus
        } else {
            ModelTier::Sonnet
        }
    }

    /// One tier up, saturating at [`ModelTier::Opus`].
    pub fn escalate(&self) -> Self {
        match self {
            ModelTier::Haiku => ModelTier::Sonnet,
            ModelTier::Sonnet | ModelTier::Opus => ModelTier::Opus,
        }
    }

    /// One tier down, saturating at [`ModelTier::Haiku`].
    pub fn downgrade(&self) -> Self {
        match self {
            ModelTier::Opus => ModelTier::Sonnet,
            ModelTier::Sonnet | ModelTier::Haiku => ModelTier::Haiku,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ComplexityLevel ────────────────────────────────────────────────────

/// Request difficulty band derived from a 0-100 complexity score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// Score below 15: greetings, one-liners, quick questions.
    Simple,
    /// Score 15-39: ordinary work requests.
    Standard,
    /// Score 40 and up: multi-file, multi-step, architectural work.
    Complex,
}

impl ComplexityLevel {
    /// Band a clamped 0-100 score into a level.
    pub fn from_score(score: u32) -> Self {
        if score >= 40 {
            ComplexityLevel::Complex
        } else if score >= 15 {
            ComplexityLevel::Standard
        } else {
            ComplexityLevel::Simple
        }
    }

    /// The canonical level a tier serves (inverse of [`ModelTier::for_level`]).
    pub fn for_tier(tier: ModelTier) -> Self {
        match tier {
            ModelTier::Haiku => ComplexityLevel::Simple,
            ModelTier::Sonnet => ComplexityLevel::Standard,
            ModelTier::Opus => ComplexityLevel::Complex,
        }
    }

    /// Lowercase level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Standard => "standard",
            ComplexityLevel::Complex => "complex",
        }
    }

    /// Numeric rank used by the pattern feature vector (0, 1, 2).
    pub fn rank(&self) -> u32 {
        match self {
            ComplexityLevel::Simple => 0,
            ComplexityLevel::Standard => 1,
            ComplexityLevel::Complex => 2,
        }
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
