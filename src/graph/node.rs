use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Block, NodeId};
use crate::operator::Operator;
use crate::types::TensorType;
use crate::value::{Attr, Tensor};

#[derive(Clone, Debug)]
pub enum Node {
    Operator(OperatorNode),
    Constant(ConstantNode),
    Value(ValueNode),
}

impl Node {
    /// Return the name of this node.
    ///
    /// Values and constants are named by the program. Operators are named
    /// after their first output.
    pub fn name(&self) -> &str {
        match self {
            Node::Operator(node) => node.name(),
            Node::Constant(node) => node.name(),
            Node::Value(node) => node.name(),
        }
    }

    /// Return the type of the value produced by this node.
    ///
    /// Operators have no type, since they produce zero or more values which
    /// are separate nodes.
    pub fn ty(&self) -> Option<TensorType> {
        match self {
            Node::Operator(_) => None,
            Node::Constant(node) => Some(node.value().tensor_type()),
            Node::Value(node) => Some(node.ty().clone()),
        }
    }

    /// Return the contained operator, if this an operator node.
    pub fn as_operator(&self) -> Option<&OperatorNode> {
        match self {
            Node::Operator(op) => Some(op),
            _ => None,
        }
    }

    /// Return the contained constant, if this a constant node.
    pub fn as_constant(&self) -> Option<&ConstantNode> {
        match self {
            Node::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&ValueNode> {
        match self {
            Node::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A value computed at runtime: a block input, captured value or operator
/// output.
#[derive(Clone, Debug)]
pub struct ValueNode {
    name: String,
    ty: TensorType,
}

impl ValueNode {
    pub fn new(name: &str, ty: TensorType) -> Self {
        ValueNode {
            name: name.to_string(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub(crate) fn set_ty(&mut self, ty: TensorType) {
        self.ty = ty;
    }

    pub(super) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// A named compile-time constant.
#[derive(Clone, Debug)]
pub struct ConstantNode {
    name: String,
    value: Tensor,
}

impl ConstantNode {
    pub fn new(name: &str, value: Tensor) -> Self {
        ConstantNode {
            name: name.to_string(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Return the value as an f64 if this is a numeric scalar or a tensor
    /// with a single element.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.value.len() == 1 {
            self.value.reshape(&[]).and_then(|v| v.item_f64())
        } else {
            None
        }
    }
}

/// A value bound to an operator input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpInput {
    /// Name of the input in the op kind's signature.
    pub param: &'static str,
    pub id: NodeId,
}

#[derive(Clone, Debug)]
pub struct OperatorNode {
    name: String,
    operator: Arc<dyn Operator + Send + Sync>,

    /// Bound inputs in signature order. Unbound optional inputs are absent
    /// and variadic inputs appear once per value.
    inputs: Vec<OpInput>,
    attrs: BTreeMap<&'static str, Attr>,
    outputs: Vec<NodeId>,
    blocks: Vec<Block>,
}

impl OperatorNode {
    pub fn new(
        name: &str,
        operator: Arc<dyn Operator + Send + Sync>,
        inputs: Vec<OpInput>,
        attrs: BTreeMap<&'static str, Attr>,
        outputs: Vec<NodeId>,
        blocks: Vec<Block>,
    ) -> Self {
        OperatorNode {
            name: name.to_string(),
            operator,
            inputs,
            attrs,
            outputs,
            blocks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the name of the op kind, eg. "add".
    pub fn kind(&self) -> &'static str {
        self.operator.name()
    }

    pub fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }

    /// Return a new `Arc` reference to this node's operator.
    ///
    /// Operators are stateless, so they can be shared between nodes.
    pub fn clone_operator(&self) -> Arc<dyn Operator + Send + Sync> {
        self.operator.clone()
    }

    pub fn inputs(&self) -> &[OpInput] {
        &self.inputs
    }

    /// Iterate over the IDs of bound inputs.
    pub fn input_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs.iter().map(|input| input.id)
    }

    /// Return the value bound to a non-variadic input.
    pub fn input(&self, param: &str) -> Option<NodeId> {
        self.inputs
            .iter()
            .find(|input| input.param == param)
            .map(|input| input.id)
    }

    pub fn attrs(&self) -> &BTreeMap<&'static str, Attr> {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    pub fn output_ids(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Return the nested blocks owned by this operator.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Bind the input at `index` to a different value.
    pub(crate) fn set_input(&mut self, index: usize, id: NodeId) {
        self.inputs[index].id = id;
    }

    pub(crate) fn take_blocks(&mut self) -> Vec<Block> {
        std::mem::take(&mut self.blocks)
    }

    pub(crate) fn set_blocks(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks;
    }

    /// Return the names of values captured by this operator's blocks from
    /// the enclosing scope.
    pub fn capture_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .blocks
            .iter()
            .flat_map(|block| block.capture_names())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Replace an input in the operator's list of inputs.
    pub(crate) fn replace_input(&mut self, old_id: NodeId, new_id: NodeId) {
        for input in self.inputs.iter_mut() {
            if input.id == old_id {
                input.id = new_id;
            }
        }
    }

    /// Rename a captured value in every nested block.
    pub(crate) fn rename_capture(&mut self, old_name: &str, new_name: &str) {
        for block in self.blocks.iter_mut() {
            block.rename_capture(old_name, new_name);
        }
    }
}
