//! Tier-to-model alias resolution.
//!
//! The router thinks in tiers; providers want concrete model ids. A
//! [`ModelAliases`] carries the mapping, with hard-coded defaults for any
//! key the embedding application leaves unset.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tier::ModelTier;

/// Default haiku-tier model id.
pub const DEFAULT_HAIKU: &str = "claude-haiku-4-5-20251001";
/// Default sonnet-tier model id.
pub const DEFAULT_SONNET: &str = "claude-sonnet-4-6";
/// Default opus-tier model id.
pub const DEFAULT_OPUS: &str = "claude-opus-4-6";

/// Concrete model id per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAliases {
    /// Model id for [`ModelTier::Haiku`].
    #[serde(default = "default_haiku")]
    pub haiku: String,

    /// Model id for [`ModelTier::Sonnet`].
    #[serde(default = "default_sonnet")]
    pub sonnet: String,

    /// Model id for [`ModelTier::Opus`].
    #[serde(default = "default_opus")]
    pub opus: String,
}

fn default_haiku() -> String {
    DEFAULT_HAIKU.into()
}

fn default_sonnet() -> String {
    DEFAULT_SONNET.into()
}

fn default_opus() -> String {
    DEFAULT_OPUS.into()
}

impl Default for ModelAliases {
    fn default() -> Self {
        Self {
            haiku: default_haiku(),
            sonnet: default_sonnet(),
            opus: default_opus(),
        }
    }
}

impl ModelAliases {
    /// Build from a loose string map (keys `"haiku"`, `"sonnet"`, `"opus"`).
    /// Missing or empty entries fall back to the hard-coded defaults.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let pick = |key: &str, fallback: &str| {
            map.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| fallback.into())
        };
        Self {
            haiku: pick("haiku", DEFAULT_HAIKU),
            sonnet: pick("sonnet", DEFAULT_SONNET),
            opus: pick("opus", DEFAULT_OPUS),
        }
    }

    /// The model id a tier resolves to.
    pub fn resolve(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Haiku => &self.haiku,
            ModelTier::Sonnet => &self.sonnet,
            ModelTier::Opus => &self.opus,
        }
    }

    /// Reverse lookup: the tier whose alias equals the model id
    /// (case-insensitive).
    pub fn tier_of(&self, model: &str) -> Option<ModelTier> {
        ModelTier::ALL
            .into_iter()
            .find(|tier| self.resolve(*tier).eq_ignore_ascii_case(model))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
