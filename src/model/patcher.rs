//! Host model patcher: additive weight patches, backups and restore.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use candle_core::{DType, Device, Tensor};

use super::base::Patcher;
use super::store::SharedModel;

/// Saved original of a weight, recorded before its first overwrite
#[derive(Debug, Clone)]
pub struct WeightBackup {
    /// Original value, kept on the offload device
    pub weight: Tensor,
    /// Whether the weight was patched in place
    pub inplace_update: bool,
}

/// Backups keyed by parameter name.
///
/// Forks hold the same store, so a restore through one patcher is seen by all.
pub type SharedBackup = Rc<RefCell<HashMap<String, WeightBackup>>>;

/// Free-form per-model options, deep-copied on fork
pub type ModelOptions = serde_json::Map<String, serde_json::Value>;

/// One additive delta queued for a weight
#[derive(Debug, Clone)]
pub struct PatchEntry {
    pub strength: f64,
    pub delta: Tensor,
}

/// Identity of a patch set; changes whenever patches are added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchId(u64);

impl PatchId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Patch state for one model: queued deltas, devices and backups.
#[derive(Debug)]
pub struct ModelPatcher {
    /// Model being patched
    model: SharedModel,
    /// Device the model runs on
    load_device: Device,
    /// Device backups are kept on
    offload_device: Device,
    /// Model size in bytes
    size: usize,
    /// Default in-place flag for `patch_model`
    weight_inplace_update: bool,
    /// Queued deltas per parameter
    patches: HashMap<String, Vec<PatchEntry>>,
    patches_uuid: PatchId,
    model_options: ModelOptions,
    backup: SharedBackup,
}

impl ModelPatcher {
    /// Create a patcher for `model`, measuring its size
    pub fn new(
        model: SharedModel,
        load_device: Device,
        offload_device: Device,
        weight_inplace_update: bool,
    ) -> Self {
        let size = model.borrow().memory_usage();
        Self::with_size(model, load_device, offload_device, size, weight_inplace_update)
    }

    /// Create a patcher with a known model size
    pub fn with_size(
        model: SharedModel,
        load_device: Device,
        offload_device: Device,
        size: usize,
        weight_inplace_update: bool,
    ) -> Self {
        Self {
            model,
            load_device,
            offload_device,
            size,
            weight_inplace_update,
            patches: HashMap::new(),
            patches_uuid: PatchId::next(),
            model_options: ModelOptions::new(),
            backup: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Fork for independent editing.
    ///
    /// The fork binds the same model, devices and size. Patch lists are copied
    /// (tensors are shared) and model options are deep-copied. The backup store
    /// is aliased, not copied.
    pub fn fork(&self) -> Self {
        Self {
            model: self.model.clone(),
            load_device: self.load_device.clone(),
            offload_device: self.offload_device.clone(),
            size: self.size,
            weight_inplace_update: self.weight_inplace_update,
            patches: self.patches.clone(),
            patches_uuid: self.patches_uuid,
            model_options: self.model_options.clone(),
            backup: Rc::clone(&self.backup),
        }
    }

    /// Queue additive deltas. Keys absent from the model are skipped.
    ///
    /// Returns the accepted keys, sorted.
    pub fn add_patches(&mut self, patches: &HashMap<String, Tensor>, strength: f64) -> Vec<String> {
        let mut added = Vec::new();

        {
            let model = self.model.borrow();
            for (key, delta) in patches {
                if !model.contains(key) {
                    continue;
                }
                self.patches.entry(key.clone()).or_default().push(PatchEntry {
                    strength,
                    delta: delta.clone(),
                });
                added.push(key.clone());
            }
        }

        added.sort();
        self.patches_uuid = PatchId::next();
        added
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    pub fn load_device(&self) -> &Device {
        &self.load_device
    }

    pub fn offload_device(&self) -> &Device {
        &self.offload_device
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn weight_inplace_update(&self) -> bool {
        self.weight_inplace_update
    }

    pub fn patches(&self) -> &HashMap<String, Vec<PatchEntry>> {
        &self.patches
    }

    pub fn patches_uuid(&self) -> PatchId {
        self.patches_uuid
    }

    pub fn model_options(&self) -> &ModelOptions {
        &self.model_options
    }

    pub fn model_options_mut(&mut self) -> &mut ModelOptions {
        &mut self.model_options
    }

    /// Backup store shared with every fork
    pub fn backup(&self) -> &SharedBackup {
        &self.backup
    }
}

impl Patcher for ModelPatcher {
    fn base(&self) -> &ModelPatcher {
        self
    }

    fn base_mut(&mut self) -> &mut ModelPatcher {
        self
    }

    fn patch_weight_to_device(
        &mut self,
        key: &str,
        device_to: Option<&Device>,
        inplace_update: bool,
    ) -> crate::Result<()> {
        let Some(entries) = self.patches.get(key) else {
            return Ok(());
        };

        let weight = self.model.borrow().get_param(key)?;

        if !self.backup.borrow().contains_key(key) {
            let original = weight.to_device(&self.offload_device)?;
            self.backup.borrow_mut().insert(
                key.to_string(),
                WeightBackup {
                    weight: original,
                    inplace_update,
                },
            );
        }

        let weight = match device_to {
            Some(device) => weight.to_device(device)?,
            None => weight,
        };

        // Accumulate in f32, store back in the weight's own dtype
        let dtype = weight.dtype();
        let mut patched = weight.to_dtype(DType::F32)?;
        for entry in entries {
            let delta = entry
                .delta
                .to_device(patched.device())?
                .to_dtype(DType::F32)?
                .affine(entry.strength, 0.0)?;
            patched = patched.add(&delta)?;
        }
        let patched = patched.to_dtype(dtype)?;

        tracing::debug!("Patched {} with {} deltas", key, entries.len());
        self.model.borrow_mut().set_param(key, patched)
    }

    fn unpatch_model(
        &mut self,
        device_to: Option<&Device>,
        unpatch_weights: bool,
    ) -> crate::Result<()> {
        if unpatch_weights {
            {
                let backup = self.backup.borrow();
                let mut model = self.model.borrow_mut();
                for (key, saved) in backup.iter() {
                    let weight = match device_to {
                        Some(device) => saved.weight.to_device(device)?,
                        None => saved.weight.clone(),
                    };
                    model.set_param(key, weight)?;
                }
                tracing::debug!("Restored {} weights", backup.len());
            }
            self.backup.borrow_mut().clear();
        }

        if let Some(device) = device_to {
            self.model.borrow_mut().to_device(device)?;
        }

        Ok(())
    }

    fn clone_patcher(&self) -> crate::Result<Box<dyn Patcher>> {
        Ok(Box::new(self.fork()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{flux_model, values};

    fn patcher() -> ModelPatcher {
        ModelPatcher::new(flux_model().into_shared(), Device::Cpu, Device::Cpu, false)
    }

    fn delta(key: &str, value: f32) -> HashMap<String, Tensor> {
        let mut patches = HashMap::new();
        patches.insert(key.to_string(), Tensor::new(&[value, value], &Device::Cpu).unwrap());
        patches
    }

    #[test]
    fn test_new_measures_size() {
        let p = patcher();
        assert_eq!(p.size(), p.model().borrow().memory_usage());
        assert!(p.patches().is_empty());
        assert!(p.backup().borrow().is_empty());
    }

    #[test]
    fn test_add_patches_skips_unknown_keys() {
        let mut p = patcher();
        let before = p.patches_uuid();

        let mut patches = delta("txt_in.w", 1.0);
        patches.extend(delta("final_layer.w", 1.0));

        assert_eq!(p.add_patches(&patches, 1.0), vec!["txt_in.w"]);
        assert_ne!(p.patches_uuid(), before);
        assert_eq!(p.patches()["txt_in.w"].len(), 1);
    }

    #[test]
    fn test_patch_and_unpatch() {
        let mut p = patcher();
        p.add_patches(&delta("txt_in.w", 1.0), 0.5);
        p.add_patches(&delta("txt_in.w", 2.0), 1.0);

        p.patch_model(None).unwrap();
        assert_eq!(values(&p.model(), "txt_in.w"), vec![4.5, 4.5]);
        assert_eq!(values(&p.model(), "img_in.w"), vec![1.0, 1.0]);
        assert_eq!(p.backup().borrow().len(), 1);

        p.unpatch_model(Some(&Device::Cpu), true).unwrap();
        assert_eq!(values(&p.model(), "txt_in.w"), vec![2.0, 2.0]);
        assert!(p.backup().borrow().is_empty());
    }

    #[test]
    fn test_unpatch_without_weights_keeps_backups() {
        let mut p = patcher();
        p.add_patches(&delta("txt_in.w", 1.0), 1.0);
        p.patch_model(None).unwrap();

        p.unpatch_model(None, false).unwrap();
        assert_eq!(values(&p.model(), "txt_in.w"), vec![3.0, 3.0]);
        assert_eq!(p.backup().borrow().len(), 1);
    }

    #[test]
    fn test_backup_records_inplace_flag() {
        let mut p = ModelPatcher::new(flux_model().into_shared(), Device::Cpu, Device::Cpu, true);
        p.add_patches(&delta("txt_in.w", 1.0), 1.0);
        p.patch_model(None).unwrap();

        assert!(p.backup().borrow()["txt_in.w"].inplace_update);
    }

    #[test]
    fn test_fork_shares_model_and_backup() {
        let mut p = patcher();
        p.add_patches(&delta("txt_in.w", 1.0), 1.0);
        p.model_options_mut()
            .insert("sampler".to_string(), serde_json::json!({"cfg": 3.5}));

        let mut fork = p.fork();
        assert!(Rc::ptr_eq(fork.model(), p.model()));
        assert!(Rc::ptr_eq(fork.backup(), p.backup()));
        assert_eq!(fork.patches_uuid(), p.patches_uuid());
        assert_eq!(fork.size(), p.size());

        fork.add_patches(&delta("img_in.w", 1.0), 1.0);
        fork.model_options_mut().clear();
        assert!(!p.patches().contains_key("img_in.w"));
        assert_eq!(p.model_options().len(), 1);
    }
}
