use std::collections::BTreeSet;

use smallvec::SmallVec;

use super::{NodeId, PartialShape, RuntimeInfo};
use crate::element_type::ElementType;
use crate::layout::Layout;
use crate::ops::OpType;

/// Metadata of the value produced by a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueInfo {
    pub element_type: ElementType,
    pub shape: PartialShape,

    /// Tensor names (aliases) by which callers refer to this value. Names are
    /// unique across a model.
    pub names: BTreeSet<String>,

    /// Layout tag. This is set on model inputs and outputs to describe the
    /// layout of the data callers exchange with the model.
    pub layout: Option<Layout>,

    pub rt_info: RuntimeInfo,
}

impl ValueInfo {
    pub fn new(element_type: ElementType, shape: PartialShape) -> ValueInfo {
        ValueInfo {
            element_type,
            shape,
            ..Default::default()
        }
    }

    /// Replace the tensor names of this value.
    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Data of a constant node.
///
/// Values are stored as `f32` and interpreted according to `element_type`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantData {
    pub element_type: ElementType,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ConstantData {
    /// Create a constant with a given shape.
    ///
    /// Panics if the length of `values` does not match the shape.
    pub fn new(element_type: ElementType, shape: &[usize], values: Vec<f32>) -> ConstantData {
        assert_eq!(
            shape.iter().product::<usize>(),
            values.len(),
            "constant data length does not match shape"
        );
        ConstantData {
            element_type,
            shape: shape.to_vec(),
            values,
        }
    }

    pub fn scalar(element_type: ElementType, value: f32) -> ConstantData {
        ConstantData::new(element_type, &[], vec![value])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Model input.
    Parameter,
    Constant(ConstantData),
    Operator(OpType),
    /// Model output. Results have a single input, the value they expose.
    Result,
}

/// A node in a [`Model`](crate::Model) graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: SmallVec<[NodeId; 2]>,
    pub(crate) output: ValueInfo,
    pub(crate) rt_info: RuntimeInfo,
}

impl Node {
    pub(crate) fn new(name: String, kind: NodeKind, inputs: &[NodeId], output: ValueInfo) -> Node {
        Node {
            name,
            kind,
            inputs: inputs.into(),
            output,
            rt_info: RuntimeInfo::default(),
        }
    }

    /// Return the friendly name of this node.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Return metadata for the value this node produces.
    ///
    /// For results this is the value exposed to callers.
    pub fn output(&self) -> &ValueInfo {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut ValueInfo {
        &mut self.output
    }

    /// Node-level runtime info.
    pub fn rt_info(&self) -> &RuntimeInfo {
        &self.rt_info
    }

    pub fn rt_info_mut(&mut self) -> &mut RuntimeInfo {
        &mut self.rt_info
    }

    pub fn as_operator(&self) -> Option<&OpType> {
        match &self.kind {
            NodeKind::Operator(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&ConstantData> {
        match &self.kind {
            NodeKind::Constant(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, NodeKind::Parameter)
    }

    pub fn is_result(&self) -> bool {
        matches!(self.kind, NodeKind::Result)
    }
}
