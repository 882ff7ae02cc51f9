//! Graph node descriptors and the node registry.
//!
//! A node declares its inputs, outputs and UI category through a
//! `NodeDescriptor`, and runs through `Node::execute`. The registry maps the
//! fixed node identifiers the graph refers to onto implementations.

mod apply_fill;

pub use apply_fill::ApplyFluxFillPatch;

use std::collections::{BTreeMap, HashMap};

use crate::model::Patcher;

/// Identifier the fill patch node is registered under
pub const APPLY_FLUX_FILL_PATCH: &str = "ApplyFluxFillPatch";

/// Kind of a node input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Model,
    Boolean { default: bool },
}

impl InputKind {
    /// Type name shown by the graph editor
    pub fn type_name(&self) -> &'static str {
        match self {
            InputKind::Model => "MODEL",
            InputKind::Boolean { .. } => "BOOLEAN",
        }
    }
}

/// A required node input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub name: &'static str,
    pub kind: InputKind,
}

/// Declarative description of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Required inputs, in display order
    pub required: Vec<InputSpec>,
    /// Output type names
    pub return_types: Vec<&'static str>,
    /// Entry point name
    pub function: &'static str,
    /// UI grouping
    pub category: &'static str,
}

/// A value flowing along a graph edge
#[derive(Debug)]
pub enum NodeValue {
    Model(Box<dyn Patcher>),
    Boolean(bool),
}

impl NodeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeValue::Model(_) => "MODEL",
            NodeValue::Boolean(_) => "BOOLEAN",
        }
    }

    /// Unwrap a model output
    pub fn into_model(self) -> crate::Result<Box<dyn Patcher>> {
        match self {
            NodeValue::Model(model) => Ok(model),
            other => Err(crate::FluxFillError::InvalidInput(format!(
                "expected MODEL, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Named inputs for one node execution
#[derive(Debug, Default)]
pub struct NodeInputs {
    values: HashMap<String, NodeValue>,
}

impl NodeInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: NodeValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: NodeValue) {
        self.values.insert(name.into(), value);
    }

    /// Take a model input out
    pub fn take_model(&mut self, name: &str) -> crate::Result<Box<dyn Patcher>> {
        match self.values.remove(name) {
            Some(value) => value.into_model().map_err(|e| match e {
                crate::FluxFillError::InvalidInput(msg) => {
                    crate::FluxFillError::InvalidInput(format!("input '{}': {}", name, msg))
                }
                other => other,
            }),
            None => Err(crate::FluxFillError::InvalidInput(format!(
                "missing required input '{}'",
                name
            ))),
        }
    }

    /// Read a boolean input, falling back to the declared default when absent
    pub fn boolean(&self, spec: &InputSpec) -> crate::Result<bool> {
        let InputKind::Boolean { default } = spec.kind else {
            return Err(crate::FluxFillError::InvalidInput(format!(
                "input '{}' is not BOOLEAN",
                spec.name
            )));
        };

        match self.values.get(spec.name) {
            None => Ok(default),
            Some(NodeValue::Boolean(value)) => Ok(*value),
            Some(other) => Err(crate::FluxFillError::InvalidInput(format!(
                "input '{}': expected BOOLEAN, got {}",
                spec.name,
                other.type_name()
            ))),
        }
    }
}

/// A graph node implementation
pub trait Node {
    fn descriptor(&self) -> NodeDescriptor;

    /// Run the node, returning one value per declared return type
    fn execute(&self, inputs: NodeInputs) -> crate::Result<Vec<NodeValue>>;
}

/// Node identifier to implementation mapping consumed by the graph
#[derive(Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<&'static str, Box<dyn Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, node: Box<dyn Node>) {
        self.nodes.insert(name, node);
    }

    pub fn get(&self, name: &str) -> crate::Result<&dyn Node> {
        self.nodes
            .get(name)
            .map(|node| node.as_ref())
            .ok_or_else(|| crate::FluxFillError::UnknownNode(name.to_string()))
    }

    /// Registered identifiers, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.nodes.keys().copied().collect()
    }

    /// Run a registered node
    pub fn execute(&self, name: &str, inputs: NodeInputs) -> crate::Result<Vec<NodeValue>> {
        tracing::debug!("Executing node {}", name);
        self.get(name)?.execute(inputs)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.names())
            .finish()
    }
}

/// Registry of every node this crate provides
pub fn node_class_mappings() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(APPLY_FLUX_FILL_PATCH, Box::new(ApplyFluxFillPatch::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = node_class_mappings();
        assert_eq!(registry.names(), vec![APPLY_FLUX_FILL_PATCH]);

        let descriptor = registry.get(APPLY_FLUX_FILL_PATCH).unwrap().descriptor();
        assert_eq!(descriptor.category, "inpaint");

        assert!(matches!(
            registry.get("ApplyFluxFillPatchV2"),
            Err(crate::FluxFillError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_boolean_inputs() {
        let spec = InputSpec {
            name: "img_in",
            kind: InputKind::Boolean { default: true },
        };

        assert!(NodeInputs::new().boolean(&spec).unwrap());
        assert!(!NodeInputs::new()
            .with("img_in", NodeValue::Boolean(false))
            .boolean(&spec)
            .unwrap());

        let model_spec = InputSpec {
            name: "model",
            kind: InputKind::Model,
        };
        assert!(NodeInputs::new().boolean(&model_spec).is_err());
    }

    #[test]
    fn test_missing_model() {
        let err = NodeInputs::new().take_model("model").unwrap_err();
        assert!(matches!(err, crate::FluxFillError::InvalidInput(_)));
    }

    #[test]
    fn test_model_input_type_mismatch() {
        let mut inputs = NodeInputs::new().with("model", NodeValue::Boolean(true));
        let err = inputs.take_model("model").unwrap_err();
        assert!(err.to_string().contains("expected MODEL"));
    }
}
