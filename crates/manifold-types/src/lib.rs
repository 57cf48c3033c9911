//! # manifold-types
//!
//! Core type definitions for the manifold AI gateway routing core.
//!
//! This crate is the foundation of the dependency graph -- all other
//! manifold crates depend on it. It contains:
//!
//! - **[`tier`]** -- [`ModelTier`] and [`ComplexityLevel`], the capability
//!   bands the router selects across, and the canonical mapping between them
//! - **[`pricing`]** -- [`PricingTable`], prefix-matched cost-per-token rates
//! - **[`aliases`]** -- [`ModelAliases`], tier-to-concrete-model resolution
//! - **[`config`]** -- [`RouterConfig`], the serde schema the embedding
//!   application deserializes its routing section into

pub mod aliases;
pub mod config;
pub mod pricing;
pub mod tier;

pub use aliases::ModelAliases;
pub use config::{BatchConfig, RouterConfig};
pub use pricing::{ModelPricing, PricingTable};
pub use tier::{ComplexityLevel, ModelTier};
