//! Fill patcher: swaps selected layers for the bundled inpainting weights.

use std::sync::Arc;

use candle_core::Device;

use super::base::Patcher;
use super::patcher::{ModelPatcher, WeightBackup};
use crate::weights::{FillWeightCache, FillWeights};

/// Whether `name` contains any of `fragments` as a substring
pub fn is_selected<S: AsRef<str>>(name: &str, fragments: &[S]) -> bool {
    fragments.iter().any(|f| name.contains(f.as_ref()))
}

/// Wraps a host patcher and replaces the selected parameters with fill weights
/// the first time any weight is placed on a device.
#[derive(Debug)]
pub struct FillModelPatcher {
    inner: ModelPatcher,
    /// Shared fill weights
    fill_weights: Arc<FillWeights>,
    /// Set once the fill weights are written, cleared on clone and unpatch
    fill_patched: bool,
    /// Fragments selecting which parameters are replaced
    fill_keys: Vec<String>,
}

impl FillModelPatcher {
    /// Clone `source` into a fill patcher, loading the fill weights if needed.
    ///
    /// Fragments carry over from `source` when it has any.
    pub fn clone_from(source: &dyn Patcher, cache: &FillWeightCache) -> crate::Result<Self> {
        let inner = source.base().fork();
        let fill_keys = source
            .selected_fragments()
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let fill_weights = cache.get_or_load()?;

        Ok(Self {
            inner,
            fill_weights,
            fill_patched: false,
            fill_keys,
        })
    }

    pub fn fill_keys(&self) -> &[String] {
        &self.fill_keys
    }

    pub fn set_fill_keys(&mut self, fill_keys: Vec<String>) {
        self.fill_keys = fill_keys;
    }

    pub fn is_fill_patched(&self) -> bool {
        self.fill_patched
    }

    pub fn fill_weights(&self) -> &Arc<FillWeights> {
        &self.fill_weights
    }

    /// Whether a parameter is selected for replacement
    pub fn process_key(&self, key: &str) -> bool {
        is_selected(key, &self.fill_keys)
    }

    /// Write the selected fill weights into the model.
    ///
    /// Originals go to the backup store only if not already there. Returns the
    /// number of parameters overwritten.
    pub fn apply_patch(&mut self) -> crate::Result<usize> {
        let model = self.inner.model().clone();
        let backup = self.inner.backup().clone();
        let offload_device = self.inner.offload_device().clone();
        let mut patched = 0;

        for (key, fill_weight) in self.fill_weights.iter() {
            if !self.process_key(key) {
                continue;
            }

            let weight = model.borrow().get_param(key)?;

            if !backup.borrow().contains_key(key) {
                let original = weight.to_device(&offload_device)?;
                backup.borrow_mut().insert(
                    key.clone(),
                    WeightBackup {
                        weight: original,
                        inplace_update: false,
                    },
                );
            }

            model.borrow_mut().set_param(key, fill_weight.clone())?;
            patched += 1;
        }

        self.fill_patched = true;
        tracing::info!("Fill weights patched ({} parameters)", patched);

        Ok(patched)
    }
}

impl Patcher for FillModelPatcher {
    fn base(&self) -> &ModelPatcher {
        &self.inner
    }

    fn base_mut(&mut self) -> &mut ModelPatcher {
        &mut self.inner
    }

    fn selected_fragments(&self) -> Option<&[String]> {
        Some(&self.fill_keys)
    }

    fn patch_weight_to_device(
        &mut self,
        key: &str,
        device_to: Option<&Device>,
        inplace_update: bool,
    ) -> crate::Result<()> {
        if !self.fill_patched {
            self.apply_patch()?;
        }

        self.inner.patch_weight_to_device(key, device_to, inplace_update)
    }

    fn unpatch_model(
        &mut self,
        device_to: Option<&Device>,
        unpatch_weights: bool,
    ) -> crate::Result<()> {
        self.fill_patched = false;
        tracing::info!("Unpatching fill weights");

        self.inner.unpatch_model(device_to, unpatch_weights)
    }

    fn clone_patcher(&self) -> crate::Result<Box<dyn Patcher>> {
        Ok(Box::new(Self {
            inner: self.inner.fork(),
            fill_weights: Arc::clone(&self.fill_weights),
            fill_patched: false,
            fill_keys: self.fill_keys.clone(),
        }))
    }
}
