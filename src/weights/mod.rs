//! Fill weight loading and the process-wide fill weight cache.
//!
//! This module provides:
//! - `load_safetensors`: Memory-map a safetensors file into named tensors
//! - `FillWeightCache`: Load the fill weights once and share them by `Arc`

mod cache;
mod loader;

pub use cache::FillWeightCache;
pub use loader::load_safetensors;

/// Replacement tensors keyed by fully-qualified parameter name
pub type FillWeights = std::collections::HashMap<String, candle_core::Tensor>;
