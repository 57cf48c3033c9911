//! Prefix-matched model pricing.
//!
//! A [`PricingTable`] maps model-id prefixes to per-million-token rates.
//! Lookups try an exact match first, then the **longest** matching prefix,
//! so a table row `claude-sonnet-4` covers `claude-sonnet-4-6` and any
//! dated snapshot of it while a more specific row still wins. Unknown
//! models price to zero rather than erroring -- cost accounting is
//! advisory, never a reason to fail a request.

use serde::{Deserialize, Serialize};

/// Per-million-token rates for one model family, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Input (prompt) rate per million tokens.
    #[serde(alias = "inputPerMtok")]
    pub input_per_mtok: f64,

    /// Output (completion) rate per million tokens.
    #[serde(alias = "outputPerMtok")]
    pub output_per_mtok: f64,
}

impl ModelPricing {
    /// Cost in USD for a token count pair at these rates.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input_per_mtok / 1_000_000.0
            + output_tokens as f64 * self.output_per_mtok / 1_000_000.0
    }

    /// Blended cost per 1K tokens: the mean of the input and output
    /// per-million rates, scaled down to a per-thousand figure.
    pub fn blended_per_1k(&self) -> f64 {
        (self.input_per_mtok + self.output_per_mtok) / 2.0 / 1000.0
    }
}

/// Input rate (USD/MTok) at or above which a model counts as expensive
/// for the cost-concentration analysis.
pub const EXPENSIVE_INPUT_RATE: f64 = 5.0;

/// Model-id-prefix to rate table.
///
/// Rows are kept sorted by prefix length descending so a linear scan finds
/// the longest match first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    rows: Vec<(String, ModelPricing)>,
}

impl PricingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// The built-in table covering the model families the default tier
    /// mapping resolves to, plus common OpenAI-family rows.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.insert("claude-haiku-4", ModelPricing { input_per_mtok: 1.0, output_per_mtok: 5.0 });
        table.insert("claude-sonnet-4", ModelPricing { input_per_mtok: 3.0, output_per_mtok: 15.0 });
        table.insert("claude-opus-4", ModelPricing { input_per_mtok: 5.0, output_per_mtok: 25.0 });
        table.insert("gpt-4o-mini", ModelPricing { input_per_mtok: 0.15, output_per_mtok: 0.6 });
        table.insert("gpt-4o", ModelPricing { input_per_mtok: 2.5, output_per_mtok: 10.0 });
        table
    }

    /// Add or replace a prefix row.
    pub fn insert(&mut self, prefix: impl Into<String>, pricing: ModelPricing) {
        let prefix = prefix.into();
        if let Some(row) = self.rows.iter_mut().find(|(p, _)| *p == prefix) {
            row.1 = pricing;
            return;
        }
        self.rows.push((prefix, pricing));
        // Longest prefix first so lookup scans greedily.
        self.rows.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Look up rates for a model id: exact match first, then longest prefix.
    pub fn for_model(&self, model: &str) -> Option<ModelPricing> {
        if let Some((_, pricing)) = self.rows.iter().find(|(p, _)| p == model) {
            return Some(*pricing);
        }
        self.rows
            .iter()
            .find(|(p, _)| model.starts_with(p.as_str()))
            .map(|(_, pricing)| *pricing)
    }

    /// Cost in USD for a request against a model, zero when unknown.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.for_model(model)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// Whether the model prices into the expensive band
    /// (input rate >= [`EXPENSIVE_INPUT_RATE`]).
    pub fn is_expensive(&self, model: &str) -> bool {
        self.for_model(model)
            .is_some_and(|p| p.input_per_mtok >= EXPENSIVE_INPUT_RATE)
    }

    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
