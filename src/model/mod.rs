//! Model parameter storage and patchers.

mod base;
mod fill;
mod patcher;
mod store;

pub use base::Patcher;
pub use fill::{is_selected, FillModelPatcher};
pub use patcher::{ModelOptions, ModelPatcher, PatchEntry, PatchId, SharedBackup, WeightBackup};
pub use store::{ModelWeights, SharedModel};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use candle_core::{Device, Tensor};

    use super::{ModelWeights, SharedModel};
    use crate::weights::FillWeightCache;

    fn pair(value: f32) -> Tensor {
        Tensor::new(&[value, value], &Device::Cpu).unwrap()
    }

    /// A tiny Flux-shaped model with one weight per layer group
    pub fn flux_model() -> ModelWeights {
        let mut params = HashMap::new();
        params.insert("img_in.w".to_string(), pair(1.0));
        params.insert("txt_in.w".to_string(), pair(2.0));
        params.insert("time_in.in_layer.w".to_string(), pair(3.0));
        params.insert("vector_in.in_layer.w".to_string(), pair(4.0));
        params.insert("double_blocks.0.img_attn.w".to_string(), pair(5.0));
        ModelWeights::new(params)
    }

    /// Fill weights for three of the groups plus one unrelated layer
    pub fn fill_cache() -> FillWeightCache {
        let mut weights = HashMap::new();
        weights.insert("img_in.w".to_string(), pair(10.0));
        weights.insert("time_in.in_layer.w".to_string(), pair(30.0));
        weights.insert("vector_in.in_layer.w".to_string(), pair(40.0));
        weights.insert("double_blocks.0.img_attn.w".to_string(), pair(50.0));
        FillWeightCache::with_weights(weights)
    }

    pub fn values(model: &SharedModel, key: &str) -> Vec<f32> {
        model.borrow().get_param(key).unwrap().to_vec1::<f32>().unwrap()
    }
}
