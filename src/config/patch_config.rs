//! Patch configuration: which layer groups receive fill weights, and where.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use candle_core::Device;

use crate::model::{ModelPatcher, SharedModel};
use crate::utils::parse_device;
use crate::weights::FillWeightCache;

/// File name of the bundled fill weights
pub const FILL_WEIGHTS_FILE: &str = "fill_state.safetensors";

/// Path of the fill weights bundled alongside this crate
pub fn bundled_weights_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(FILL_WEIGHTS_FILE)
}

/// Layer groups of a Flux transformer that the fill weights cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillGroup {
    /// Image latent input projection
    #[serde(rename = "img_in")]
    ImgIn,
    /// Text conditioning input projection
    #[serde(rename = "txt_in")]
    TxtIn,
    #[serde(rename = "vector_in.in_layer")]
    VectorInLayer,
    #[serde(rename = "vector_in.out_layer")]
    VectorOutLayer,
    #[serde(rename = "time_in.in_layer")]
    TimeInLayer,
    #[serde(rename = "time_in.out_layer")]
    TimeOutLayer,
}

impl FillGroup {
    /// All groups, in node input order
    pub const ALL: [FillGroup; 6] = [
        FillGroup::ImgIn,
        FillGroup::TxtIn,
        FillGroup::VectorInLayer,
        FillGroup::VectorOutLayer,
        FillGroup::TimeInLayer,
        FillGroup::TimeOutLayer,
    ];

    /// Parameter-name fragment matched against qualified parameter names.
    /// Doubles as the node input name.
    pub fn fragment(&self) -> &'static str {
        match self {
            FillGroup::ImgIn => "img_in",
            FillGroup::TxtIn => "txt_in",
            FillGroup::VectorInLayer => "vector_in.in_layer",
            FillGroup::VectorOutLayer => "vector_in.out_layer",
            FillGroup::TimeInLayer => "time_in.in_layer",
            FillGroup::TimeOutLayer => "time_in.out_layer",
        }
    }

    /// Look up a group by its fragment
    pub fn from_fragment(fragment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.fragment() == fragment)
    }
}

/// Per-group toggles. Every group is enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillSelection {
    #[serde(rename = "img_in", default = "default_enabled")]
    pub img_in: bool,

    #[serde(rename = "txt_in", default = "default_enabled")]
    pub txt_in: bool,

    #[serde(rename = "vector_in.in_layer", default = "default_enabled")]
    pub vector_in_layer: bool,

    #[serde(rename = "vector_in.out_layer", default = "default_enabled")]
    pub vector_out_layer: bool,

    #[serde(rename = "time_in.in_layer", default = "default_enabled")]
    pub time_in_layer: bool,

    #[serde(rename = "time_in.out_layer", default = "default_enabled")]
    pub time_out_layer: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for FillSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl FillSelection {
    /// Every group enabled
    pub fn all() -> Self {
        Self::from_fn(|_| true)
    }

    /// Every group disabled
    pub fn none() -> Self {
        Self::from_fn(|_| false)
    }

    /// Build a selection by asking `enabled` about each group
    pub fn from_fn(mut enabled: impl FnMut(FillGroup) -> bool) -> Self {
        Self {
            img_in: enabled(FillGroup::ImgIn),
            txt_in: enabled(FillGroup::TxtIn),
            vector_in_layer: enabled(FillGroup::VectorInLayer),
            vector_out_layer: enabled(FillGroup::VectorOutLayer),
            time_in_layer: enabled(FillGroup::TimeInLayer),
            time_out_layer: enabled(FillGroup::TimeOutLayer),
        }
    }

    /// Whether a group is enabled
    pub fn is_enabled(&self, group: FillGroup) -> bool {
        match group {
            FillGroup::ImgIn => self.img_in,
            FillGroup::TxtIn => self.txt_in,
            FillGroup::VectorInLayer => self.vector_in_layer,
            FillGroup::VectorOutLayer => self.vector_out_layer,
            FillGroup::TimeInLayer => self.time_in_layer,
            FillGroup::TimeOutLayer => self.time_out_layer,
        }
    }

    /// Fragments of the enabled groups, in node input order
    pub fn fragments(&self) -> Vec<String> {
        FillGroup::ALL
            .into_iter()
            .filter(|g| self.is_enabled(*g))
            .map(|g| g.fragment().to_string())
            .collect()
    }
}

/// Configuration for building fill patchers outside a node graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Safetensors file holding the fill weights
    #[serde(default = "bundled_weights_path")]
    pub weights_path: PathBuf,

    /// Device the model runs on
    #[serde(default = "default_device")]
    pub load_device: String,

    /// Device backups and idle weights are kept on
    #[serde(default = "default_device")]
    pub offload_device: String,

    /// Whether the host patcher updates weights in place
    #[serde(default)]
    pub weight_inplace_update: bool,

    /// Groups to patch
    #[serde(default)]
    pub selection: FillSelection,
}

fn default_device() -> String {
    "cpu".to_string()
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            weights_path: bundled_weights_path(),
            load_device: default_device(),
            offload_device: default_device(),
            weight_inplace_update: false,
            selection: FillSelection::default(),
        }
    }
}

impl PatchConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PatchConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the load device
    pub fn load_device(&self) -> crate::Result<Device> {
        parse_device(&self.load_device)
    }

    /// Resolve the offload device
    pub fn offload_device(&self) -> crate::Result<Device> {
        parse_device(&self.offload_device)
    }

    /// Host patcher for `model` using the configured devices
    pub fn model_patcher(&self, model: SharedModel) -> crate::Result<ModelPatcher> {
        Ok(ModelPatcher::new(
            model,
            self.load_device()?,
            self.offload_device()?,
            self.weight_inplace_update,
        ))
    }

    /// Unloaded cache over the configured weight file
    pub fn weight_cache(&self) -> FillWeightCache {
        FillWeightCache::new(&self.weights_path)
    }
}
