//! Base trait for model patchers.

use candle_core::Device;

use super::patcher::ModelPatcher;
use super::store::SharedModel;

/// A patch configuration bound to a shared model.
///
/// Wrappers hold a `ModelPatcher` and override the hooks they care about. The
/// provided methods dispatch through `self`, so an override of
/// `patch_weight_to_device` also takes effect inside `patch_model`.
pub trait Patcher: std::fmt::Debug {
    /// The host patcher holding devices, patches and backups
    fn base(&self) -> &ModelPatcher;

    fn base_mut(&mut self) -> &mut ModelPatcher;

    /// Fill fragments selected on this patcher, if it carries any
    fn selected_fragments(&self) -> Option<&[String]> {
        None
    }

    /// Patch a single weight and place it on `device_to`
    fn patch_weight_to_device(
        &mut self,
        key: &str,
        device_to: Option<&Device>,
        inplace_update: bool,
    ) -> crate::Result<()>;

    /// Restore backed-up weights and optionally move the model
    fn unpatch_model(&mut self, device_to: Option<&Device>, unpatch_weights: bool)
        -> crate::Result<()>;

    /// Fork this patcher for independent editing
    fn clone_patcher(&self) -> crate::Result<Box<dyn Patcher>>;

    /// Shared handle to the underlying model
    fn model(&self) -> SharedModel {
        self.base().model().clone()
    }

    /// Patch every model parameter, then move the model to `device_to`
    fn patch_model(&mut self, device_to: Option<&Device>) -> crate::Result<()> {
        let keys = self.base().model().borrow().keys();
        let inplace_update = self.base().weight_inplace_update();

        for key in &keys {
            self.patch_weight_to_device(key, device_to, inplace_update)?;
        }

        if let Some(device) = device_to {
            self.base().model().borrow_mut().to_device(device)?;
        }

        Ok(())
    }
}
