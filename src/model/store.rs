//! Named parameter store for a loaded model.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use candle_core::{Device, Tensor};

use crate::utils::tensor_bytes;
use crate::weights::load_safetensors;

/// Handle to a model shared by every patcher cloned from it
pub type SharedModel = Rc<RefCell<ModelWeights>>;

/// Model parameters keyed by fully-qualified name (e.g. `img_in.weight`)
#[derive(Clone, Default)]
pub struct ModelWeights {
    params: HashMap<String, Tensor>,
}

impl ModelWeights {
    /// Create a store from named tensors
    pub fn new(params: HashMap<String, Tensor>) -> Self {
        Self { params }
    }

    /// Load every tensor of a safetensors checkpoint onto `device`
    pub fn from_safetensors(path: impl AsRef<Path>, device: &Device) -> crate::Result<Self> {
        Ok(Self::new(load_safetensors(path, device)?))
    }

    /// Wrap into a shared handle
    pub fn into_shared(self) -> SharedModel {
        Rc::new(RefCell::new(self))
    }

    /// Read a parameter by qualified name
    pub fn get_param(&self, key: &str) -> crate::Result<Tensor> {
        self.params
            .get(key)
            .cloned()
            .ok_or_else(|| crate::FluxFillError::UnknownParameter(key.to_string()))
    }

    /// Replace an existing parameter
    pub fn set_param(&mut self, key: &str, value: Tensor) -> crate::Result<()> {
        match self.params.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(crate::FluxFillError::UnknownParameter(key.to_string())),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Parameter names, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.params.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total parameter storage in bytes
    pub fn memory_usage(&self) -> usize {
        self.params.values().map(tensor_bytes).sum()
    }

    /// Move every parameter to `device`
    pub fn to_device(&mut self, device: &Device) -> crate::Result<()> {
        for tensor in self.params.values_mut() {
            *tensor = tensor.to_device(device)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModelWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelWeights")
            .field("num_params", &self.params.len())
            .field("bytes", &self.memory_usage())
            .finish()
    }
}
