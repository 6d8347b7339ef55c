use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::{infer_output, ConstantData, Model, Node, NodeId, NodeKind, RuntimeInfo, ValueInfo};
use crate::layout::Layout;
use crate::ops::{InferShapesError, OpType};

/// A set of nodes staged for addition to a [`Model`].
///
/// A `GraphEdit` borrows the model immutably. New nodes are added to a
/// staging area and get IDs following on from the model's own node IDs, so
/// staged nodes can reference both existing and other staged nodes. Nothing
/// changes in the model until the edit is committed, so an edit can be
/// abandoned at any point without effect.
pub struct GraphEdit<'m> {
    model: &'m Model,
    base: usize,
    staged: Vec<Node>,
    names: NodeNameGenerator,
}

impl<'m> GraphEdit<'m> {
    pub(crate) fn new(model: &'m Model) -> GraphEdit<'m> {
        let mut names = NodeNameGenerator::new();
        for (_, node) in model.nodes() {
            names.reserve(node.name());
        }
        GraphEdit {
            model,
            base: model.next_id(),
            staged: Vec::new(),
            names,
        }
    }

    /// Return the model being edited.
    pub fn model(&self) -> &'m Model {
        self.model
    }

    /// Look up an existing or staged node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        match id.as_usize().checked_sub(self.base) {
            Some(index) => self.staged.get(index),
            None => self.model.node(id),
        }
    }

    /// Return metadata for the value produced by an existing or staged node.
    pub fn value(&self, id: NodeId) -> Option<&ValueInfo> {
        self.node(id).map(|n| n.output())
    }

    /// Return a staged node for modification.
    ///
    /// Returns `None` if `id` refers to a node in the model, which cannot be
    /// modified through an edit.
    pub fn staged_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let index = id.as_usize().checked_sub(self.base)?;
        self.staged.get_mut(index)
    }

    /// Return the number of staged nodes.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId::from_usize(self.base + self.staged.len());
        self.staged.push(node);
        id
    }

    /// Stage an operator node named after its operator type.
    pub fn add_op(&mut self, op: OpType, inputs: &[NodeId]) -> Result<NodeId, InferShapesError> {
        let prefix = op.name();
        self.add_named_op(prefix, op, inputs)
    }

    /// Stage an operator node whose name starts with `prefix`.
    ///
    /// A numeric suffix is added if the name is already used.
    pub fn add_named_op(
        &mut self,
        prefix: &str,
        op: OpType,
        inputs: &[NodeId],
    ) -> Result<NodeId, InferShapesError> {
        let info = infer_output(&op, inputs, |id| self.value(id))?;
        let name = self.names.generate(prefix);
        Ok(self.push(Node::new(name, NodeKind::Operator(op), inputs, info)))
    }

    pub fn add_constant(&mut self, data: ConstantData) -> NodeId {
        let info = ValueInfo::new(data.element_type, data.shape.as_slice().into());
        let name = self.names.generate("Constant");
        self.push(Node::new(name, NodeKind::Constant(data), &[], info))
    }

    /// Stage a parameter with an exact friendly name.
    pub(crate) fn add_parameter(
        &mut self,
        name: String,
        info: ValueInfo,
        rt_info: RuntimeInfo,
    ) -> NodeId {
        self.names.reserve(&name);
        let mut node = Node::new(name, NodeKind::Parameter, &[], info);
        node.rt_info = rt_info;
        self.push(node)
    }

    pub(crate) fn finish(
        self,
        params: Vec<ParamReplacement>,
        results: Vec<ResultReplacement>,
    ) -> StagedChanges {
        StagedChanges {
            base: self.base,
            nodes: self.staged,
            params,
            results,
        }
    }
}

/// Replacement of the parameter at `index` in the parameter list.
pub(crate) struct ParamReplacement {
    pub index: usize,
    pub old: NodeId,

    /// Parameters which take the place of `old` in the parameter list.
    pub new_params: SmallVec<[NodeId; 3]>,

    /// Value which replaces `old` as an input of its consumers.
    pub output: NodeId,
}

pub(crate) struct ResultReplacement {
    pub result: NodeId,
    pub producer: NodeId,
    pub layout: Option<Layout>,
}

/// Changes produced by a [`GraphEdit`], ready to be applied with
/// [`Model::commit`].
pub(crate) struct StagedChanges {
    /// ID of the first staged node.
    pub base: usize,
    pub nodes: Vec<Node>,
    pub params: Vec<ParamReplacement>,
    pub results: Vec<ResultReplacement>,
}

/// Generates node names that are unique within a model.
struct NodeNameGenerator {
    used_names: FxHashSet<String>,
}

impl NodeNameGenerator {
    fn new() -> NodeNameGenerator {
        NodeNameGenerator {
            used_names: FxHashSet::default(),
        }
    }

    fn reserve(&mut self, name: &str) {
        self.used_names.insert(name.to_string());
    }

    fn generate(&mut self, prefix: &str) -> String {
        let mut name = prefix.to_string();
        let mut suffix = 0;
        while self.used_names.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", prefix, suffix);
        }
        self.used_names.insert(name.clone());
        name
    }
}
