//! The `ApplyFluxFillPatch` node.

use std::sync::Arc;

use super::{InputKind, InputSpec, Node, NodeDescriptor, NodeInputs, NodeValue};
use crate::config::{FillGroup, FillSelection};
use crate::model::{FillModelPatcher, Patcher};
use crate::weights::FillWeightCache;

/// Clones a model's patcher into a fill patcher restricted to the toggled
/// layer groups.
#[derive(Debug, Clone)]
pub struct ApplyFluxFillPatch {
    cache: Arc<FillWeightCache>,
}

impl Default for ApplyFluxFillPatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplyFluxFillPatch {
    /// Node backed by the bundled fill weights
    pub fn new() -> Self {
        Self::with_cache(FillWeightCache::global())
    }

    /// Node backed by a specific cache
    pub fn with_cache(cache: Arc<FillWeightCache>) -> Self {
        Self { cache }
    }

    pub fn patch(
        &self,
        model: &dyn Patcher,
        selection: FillSelection,
    ) -> crate::Result<FillModelPatcher> {
        let mut patcher = FillModelPatcher::clone_from(model, &self.cache)?;
        patcher.set_fill_keys(selection.fragments());
        Ok(patcher)
    }
}

impl Node for ApplyFluxFillPatch {
    fn descriptor(&self) -> NodeDescriptor {
        let mut required = vec![InputSpec {
            name: "model",
            kind: InputKind::Model,
        }];
        required.extend(FillGroup::ALL.into_iter().map(|group| InputSpec {
            name: group.fragment(),
            kind: InputKind::Boolean { default: true },
        }));

        NodeDescriptor {
            required,
            return_types: vec!["MODEL"],
            function: "patch",
            category: "inpaint",
        }
    }

    fn execute(&self, mut inputs: NodeInputs) -> crate::Result<Vec<NodeValue>> {
        let model = inputs.take_model("model")?;

        let mut enabled = Vec::new();
        for spec in self.descriptor().required {
            if matches!(spec.kind, InputKind::Boolean { .. }) && inputs.boolean(&spec)? {
                enabled.extend(FillGroup::from_fragment(spec.name));
            }
        }
        let selection = FillSelection::from_fn(|group| enabled.contains(&group));

        let patcher = self.patch(model.as_ref(), selection)?;
        Ok(vec![NodeValue::Model(Box::new(patcher))])
    }
}
