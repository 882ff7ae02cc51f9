//! # rs-flux-fill
//!
//! Reversible Flux fill (inpainting) weight patches for node-based diffusion
//! pipelines.
//!
//! ## Core Concept
//!
//! A bundled safetensors file holds replacement weights for the input
//! projection layers of a Flux transformer. Instead of loading a separate
//! inpainting checkpoint, the fill patcher swaps those layers in place:
//! - **Load once**: fill weights are read on first use and shared by `Arc`
//! - **Select by fragment**: only parameters whose names contain an enabled
//!   layer-group fragment are replaced
//! - **Apply lazily**: the swap happens on the first weight placement
//! - **Restore**: originals are backed up once and written back on unpatch
//!
//! ## Example
//!
//! ```ignore
//! use candle_core::Device;
//! use rs_flux_fill::{ApplyFluxFillPatch, FillSelection, ModelPatcher, ModelWeights, Patcher};
//!
//! fn main() -> rs_flux_fill::Result<()> {
//!     let model = ModelWeights::from_safetensors("flux1-dev.safetensors", &Device::Cpu)?;
//!     let base = ModelPatcher::new(model.into_shared(), Device::Cpu, Device::Cpu, false);
//!
//!     let mut patcher = ApplyFluxFillPatch::new().patch(&base, FillSelection::all())?;
//!     patcher.patch_model(Some(&Device::Cpu))?;
//!     // Run inference...
//!     patcher.unpatch_model(None, true)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod model;
pub mod nodes;
pub mod utils;
pub mod weights;

// Re-exports for convenience
pub use config::{FillGroup, FillSelection, PatchConfig};
pub use model::{FillModelPatcher, ModelPatcher, ModelWeights, Patcher, SharedModel};
pub use nodes::{node_class_mappings, ApplyFluxFillPatch, Node, NodeInputs, NodeRegistry, NodeValue};
pub use weights::{FillWeightCache, FillWeights};

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum FluxFillError {
    #[error("Weight loading failed: {0}")]
    WeightLoad(String),

    #[error("Unsupported tensor dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid node input: {0}")]
    InvalidInput(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FluxFillError>;
