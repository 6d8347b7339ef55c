//! Graph representation of a model: parameters, operators, constants and
//! results connected by value edges.

// The std HashMap/HashSet provide DOS resistance. In this module hash keys are
// mostly `NodeId`s which we allocate ourselves, so this is not a concern.
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::smallvec;

mod edit;
mod node;
mod node_id;
mod rt_info;
mod shape;

pub use edit::GraphEdit;
pub(crate) use edit::{ParamReplacement, ResultReplacement, StagedChanges};
pub use node::{ConstantData, Node, NodeKind, ValueInfo};
pub use node_id::NodeId;
pub use rt_info::{RtValue, RuntimeInfo, MEMORY_TYPE};
pub use shape::{Dimension, PartialShape};

use crate::element_type::ElementType;
use crate::ops::{InferShapesError, OpType};

/// A computation graph with ordered inputs ("parameters") and outputs
/// ("results").
///
/// Nodes are stored in an arena and addressed by [`NodeId`]. Each node
/// produces one value, which is identified by the same ID.
#[derive(Clone, Debug, Default)]
pub struct Model {
    nodes: Vec<Option<Node>>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::from_usize(self.nodes.len());
        self.nodes.push(Some(node));
        id
    }

    /// Add a model input and append it to the parameter list.
    pub fn add_parameter(
        &mut self,
        name: &str,
        element_type: ElementType,
        shape: impl Into<PartialShape>,
    ) -> NodeId {
        let node = Node::new(
            name.to_string(),
            NodeKind::Parameter,
            &[],
            ValueInfo::new(element_type, shape.into()),
        );
        let id = self.push_node(node);
        self.parameters.push(id);
        id
    }

    pub fn add_constant(&mut self, name: &str, data: ConstantData) -> NodeId {
        let info = ValueInfo::new(data.element_type, PartialShape::from(data.shape.as_slice()));
        self.push_node(Node::new(
            name.to_string(),
            NodeKind::Constant(data),
            &[],
            info,
        ))
    }

    /// Add an operator node, inferring its output type and shape.
    pub fn add_op(
        &mut self,
        name: &str,
        op: OpType,
        inputs: &[NodeId],
    ) -> Result<NodeId, InferShapesError> {
        let info = infer_output(&op, inputs, |id| self.value(id))?;
        Ok(self.push_node(Node::new(
            name.to_string(),
            NodeKind::Operator(op),
            inputs,
            info,
        )))
    }

    /// Add a model output which exposes the value of `input`, and append it
    /// to the result list.
    ///
    /// Panics if `input` is not a node in this model.
    pub fn add_result(&mut self, name: &str, input: NodeId) -> NodeId {
        let Some(input_info) = self.value(input) else {
            panic!("result input {} is not in the model", input);
        };
        let info = ValueInfo::new(input_info.element_type, input_info.shape.clone());
        let id = self.push_node(Node::new(name.to_string(), NodeKind::Result, &[input], info));
        self.results.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize())?.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.as_usize())?.as_mut()
    }

    /// Return metadata for the value produced by node `id`.
    pub fn value(&self, id: NodeId) -> Option<&ValueInfo> {
        self.node(id).map(|n| n.output())
    }

    /// Iterate over live nodes in ID order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| Some((NodeId::from_usize(i), node.as_ref()?)))
    }

    /// Return the number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Return the total number of node slots, including removed nodes.
    ///
    /// IDs of new nodes start from this value.
    pub(crate) fn next_id(&self) -> usize {
        self.nodes.len()
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    /// Return the parameter node at position `index` in the parameter list.
    pub fn parameter(&self, index: usize) -> Option<&Node> {
        self.node(*self.parameters.get(index)?)
    }

    /// Return the result node at position `index` in the result list.
    pub fn result(&self, index: usize) -> Option<&Node> {
        self.node(*self.results.get(index)?)
    }

    /// Return the ID of the node which produces the value exposed by result
    /// `index`.
    pub fn result_producer(&self, index: usize) -> Option<NodeId> {
        self.result(index)?.inputs().first().copied()
    }

    /// Find a node by its friendly name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes()
            .find(|(_, node)| node.name() == name)
            .map(|(id, _)| id)
    }

    /// Return true if any value in the model has tensor name `alias`.
    pub fn has_alias(&self, alias: &str) -> bool {
        self.nodes().any(|(_, node)| node.output().has_name(alias))
    }

    /// Return the IDs of nodes which take the value of `id` as an input.
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| node.inputs().contains(&id))
            .map(|(consumer_id, _)| consumer_id)
            .collect()
    }

    /// Apply changes staged by a [`GraphEdit`].
    ///
    /// Staged nodes which are not reachable from a new parameter, a new
    /// parameter's replacement value or a new result producer are discarded.
    pub(crate) fn commit(&mut self, changes: StagedChanges) {
        let StagedChanges {
            base,
            nodes: staged,
            params,
            results,
        } = changes;
        debug_assert_eq!(base, self.nodes.len());

        let mut roots: Vec<NodeId> = Vec::new();
        for param in &params {
            roots.extend(param.new_params.iter().copied());
            roots.push(param.output);
        }
        roots.extend(results.iter().map(|r| r.producer));

        let mut reachable = FxHashSet::default();
        while let Some(id) = roots.pop() {
            let Some(index) = id.as_usize().checked_sub(base) else {
                continue;
            };
            let Some(node) = staged.get(index) else {
                continue;
            };
            if reachable.insert(index) {
                roots.extend(node.inputs.iter().copied());
            }
        }

        let replaced: FxHashMap<NodeId, NodeId> =
            params.iter().map(|p| (p.old, p.output)).collect();

        for (index, node) in staged.into_iter().enumerate() {
            let node = reachable.contains(&index).then_some(node);
            self.nodes.push(node);
        }

        for node in self.nodes.iter_mut().flatten() {
            for input in node.inputs.iter_mut() {
                if let Some(new_id) = replaced.get(input) {
                    *input = *new_id;
                }
            }
        }

        for result in results {
            let producer = replaced.get(&result.producer).copied().unwrap_or(result.producer);
            let Some(producer_info) = self.value(producer).cloned() else {
                continue;
            };
            if let Some(node) = self.node_mut(result.result) {
                node.inputs = smallvec![producer];
                node.output.element_type = producer_info.element_type;
                node.output.shape = producer_info.shape;
                node.output.layout = result.layout;
            }
        }

        let mut params = params;
        params.sort_by_key(|p| p.index);
        for param in params.into_iter().rev() {
            self.parameters
                .splice(param.index..param.index + 1, param.new_params);
            if let Some(slot) = self.nodes.get_mut(param.old.as_usize()) {
                *slot = None;
            }
        }
    }
}

/// Infer the output of `op` applied to `inputs`, looking up input metadata
/// with `value`.
pub(crate) fn infer_output<'a>(
    op: &OpType,
    inputs: &[NodeId],
    value: impl Fn(NodeId) -> Option<&'a ValueInfo>,
) -> Result<ValueInfo, InferShapesError> {
    let input_infos: Option<Vec<&ValueInfo>> = inputs.iter().map(|id| value(*id)).collect();
    let input_infos = input_infos.ok_or(InferShapesError::IncorrectInputCount)?;
    let (element_type, shape) = op.infer(&input_infos)?;
    Ok(ValueInfo::new(element_type, shape))
}

#[cfg(test)]
mod tests;
