//! Blocks of operations, the unit of scoping and rewriting in a program.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

mod node;
mod node_id;
mod scope;

#[cfg(test)]
pub(crate) mod builder;

#[cfg(test)]
mod tests;

pub use node::{ConstantNode, Node, OpInput, OperatorNode, ValueNode};
pub use node_id::NodeId;
pub use scope::ScopeEnv;

use crate::operator::{BlockInterface, InferContext, InferError, InferInput, Operator};
use crate::target::TargetVersion;
use crate::types::TensorType;
use crate::value::{Attr, Tensor};

/// Return `prefix` if it is unused, or otherwise the first of `prefix_1`,
/// `prefix_2` ... which is unused.
pub(crate) fn unique_name(prefix: &str, is_used: impl Fn(&str) -> bool) -> String {
    let mut name = prefix.to_string();
    let mut suffix = 0;
    while is_used(&name) {
        suffix += 1;
        name = format!("{}_{}", prefix, suffix);
    }
    name
}

/// Name and type of a block input or output.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedType {
    pub name: String,
    pub ty: TensorType,
}

/// External interface of a block: its named inputs and outputs.
///
/// Optimization passes must not change a block's signature.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSignature {
    pub inputs: Vec<NamedType>,
    pub outputs: Vec<NamedType>,
}

/// An ordered sequence of operations plus the values they consume and
/// produce, forming one lexical scope.
///
/// A block owns an arena of [`Node`]s. Value and constant nodes are named,
/// and names are unique within a block. Operators are executed in the
/// order given by [`op_order`](Block::op_order), and an operator may only
/// consume values that are block inputs, captures, constants or outputs of
/// earlier operators.
///
/// Captures are placeholder values for names defined in an enclosing
/// block. They are resolved by name, like free variables in a closure.
#[derive(Clone, Debug, Default)]
pub struct Block {
    nodes: Vec<Option<Node>>,

    /// Operator nodes in program order.
    order: Vec<NodeId>,

    input_ids: Vec<NodeId>,
    output_ids: Vec<NodeId>,

    /// Names of outputs in the block's interface. These are fixed when the
    /// block is closed and don't change if a pass forwards a different value
    /// to an output.
    output_names: Vec<String>,

    captures: Vec<NodeId>,

    /// Map of name to value or constant node.
    names: FxHashMap<String, NodeId>,

    /// Map of value node to the operator which produces it.
    producers: FxHashMap<NodeId, NodeId>,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Block {
        Block::default()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId::from_u32(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    /// Add a value node which will be produced by an operator added later.
    pub(crate) fn add_value(&mut self, name: &str, ty: TensorType) -> NodeId {
        let id = self.alloc(Node::Value(ValueNode::new(name, ty)));
        self.names.insert(name.to_string(), id);
        id
    }

    pub(crate) fn add_input(&mut self, name: &str, ty: TensorType) -> NodeId {
        let id = self.add_value(name, ty);
        self.input_ids.push(id);
        id
    }

    /// Add a placeholder for a value defined in an enclosing block.
    pub(crate) fn add_capture(&mut self, name: &str, ty: TensorType) -> NodeId {
        let id = self.add_value(name, ty);
        self.captures.push(id);
        id
    }

    pub(crate) fn add_constant(&mut self, name: &str, value: Tensor) -> NodeId {
        let id = self.alloc(Node::Constant(ConstantNode::new(name, value)));
        self.names.insert(name.to_string(), id);
        id
    }

    /// Append an operator to the end of the block.
    pub(crate) fn add_op(&mut self, op: OperatorNode) -> NodeId {
        let index = self.order.len();
        self.insert_op(index, op)
    }

    /// Insert an operator at position `index` in program order.
    pub(crate) fn insert_op(&mut self, index: usize, op: OperatorNode) -> NodeId {
        let outputs = op.output_ids().to_vec();
        let id = self.alloc(Node::Operator(op));
        for output in outputs {
            self.producers.insert(output, id);
        }
        self.order.insert(index, id);
        id
    }

    /// Declare the block's outputs.
    pub(crate) fn set_outputs(&mut self, ids: Vec<NodeId>, names: Vec<String>) {
        debug_assert_eq!(ids.len(), names.len());
        self.output_ids = ids;
        self.output_names = names;
    }

    /// Change which values provide the block's outputs, keeping the names in
    /// the block's interface.
    pub(crate) fn set_output_ids(&mut self, ids: Vec<NodeId>) {
        debug_assert_eq!(ids.len(), self.output_names.len());
        self.output_ids = ids;
    }

    /// Remove an operator from the block. Its output value nodes are kept.
    pub(crate) fn remove_op(&mut self, id: NodeId) -> Option<OperatorNode> {
        let slot = self.nodes.get_mut(id.as_usize())?;
        if !matches!(slot, Some(Node::Operator(_))) {
            return None;
        }
        let Some(Node::Operator(op)) = slot.take() else {
            return None;
        };
        self.order.retain(|op_id| *op_id != id);
        for output in op.output_ids() {
            self.producers.remove(output);
        }
        Some(op)
    }

    /// Remove a value or constant node.
    pub(crate) fn remove_value(&mut self, id: NodeId) {
        let Some(slot) = self.nodes.get_mut(id.as_usize()) else {
            return;
        };
        if matches!(slot, Some(Node::Operator(_)) | None) {
            return;
        }
        if let Some(node) = slot.take() {
            if self.names.get(node.name()) == Some(&id) {
                self.names.remove(node.name());
            }
        }
        self.captures.retain(|c| *c != id);
        self.producers.remove(&id);
    }

    /// Replace a value node with a constant of the same name.
    ///
    /// The operator which produced the value must already have been removed.
    pub(crate) fn convert_to_constant(&mut self, id: NodeId, value: Tensor) {
        let Some(slot) = self.nodes.get_mut(id.as_usize()) else {
            return;
        };
        let Some(Node::Value(value_node)) = slot.as_ref() else {
            return;
        };
        let name = value_node.name().to_string();
        *slot = Some(Node::Constant(ConstantNode::new(&name, value)));
        self.captures.retain(|c| *c != id);
        self.producers.remove(&id);
    }

    /// Replace a captured value with a local constant named `name`.
    ///
    /// Captures of the old name in nested blocks are renamed so they refer
    /// to the new constant.
    pub(crate) fn convert_capture_to_constant(&mut self, id: NodeId, name: &str, value: Tensor) {
        if !self.captures.contains(&id) {
            return;
        }
        let old_name = self.node_name(id);
        for op_id in self.order.clone() {
            if let Some(op) = self.op_mut(op_id) {
                op.rename_capture(&old_name, name);
            }
        }
        self.names.remove(&old_name);
        self.nodes[id.as_usize()] = Some(Node::Constant(ConstantNode::new(name, value)));
        self.names.insert(name.to_string(), id);
        self.captures.retain(|c| *c != id);
    }

    pub(crate) fn set_value_type(&mut self, id: NodeId, ty: TensorType) {
        if let Some(Some(Node::Value(value))) = self.nodes.get_mut(id.as_usize()) {
            value.set_ty(ty);
        }
    }

    pub(crate) fn op_mut(&mut self, id: NodeId) -> Option<&mut OperatorNode> {
        match self.nodes.get_mut(id.as_usize()) {
            Some(Some(Node::Operator(op))) => Some(op),
            _ => None,
        }
    }

    /// Replace uses of `old_id` in operator inputs and block outputs with
    /// `new_id`.
    ///
    /// This scans every operator. Passes use an edge map instead.
    pub(crate) fn replace_uses(&mut self, old_id: NodeId, new_id: NodeId) {
        for op_id in self.order.clone() {
            if let Some(op) = self.op_mut(op_id) {
                op.replace_input(old_id, new_id);
            }
        }
        for output in self.output_ids.iter_mut().filter(|id| **id == old_id) {
            *output = new_id;
        }
    }

    /// Rename a captured value, along with the captures in nested blocks
    /// which refer to it.
    ///
    /// If `new_name` is already captured, the two captures are merged.
    pub(crate) fn rename_capture(&mut self, old_name: &str, new_name: &str) {
        let Some(id) = self
            .node_id(old_name)
            .filter(|id| self.captures.contains(id))
        else {
            return;
        };

        for op_id in self.order.clone() {
            if let Some(op) = self.op_mut(op_id) {
                op.rename_capture(old_name, new_name);
            }
        }

        if let Some(existing) = self
            .node_id(new_name)
            .filter(|existing| self.captures.contains(existing))
        {
            self.replace_uses(id, existing);
            self.remove_value(id);
            return;
        }

        self.names.remove(old_name);
        if let Some(Some(Node::Value(value))) = self.nodes.get_mut(id.as_usize()) {
            value.set_name(new_name);
        }
        self.names.insert(new_name.to_string(), id);
    }

    /// Generate a name starting with `prefix` which is not used in this
    /// block or any enclosing scope.
    pub(crate) fn unique_name(&self, prefix: &str, env: Option<&ScopeEnv>) -> String {
        unique_name(prefix, |name| {
            self.uses_name(name) || env.is_some_and(|env| env.contains_name(name))
        })
    }

    /// Return true if `name` is bound in this block or any nested block.
    pub fn uses_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
            || self
                .operators()
                .any(|(_, op)| op.blocks().iter().any(|block| block.uses_name(name)))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize()).and_then(|n| n.as_ref())
    }

    /// Look up a value or constant node by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Return the name of a node, or a placeholder if the ID is invalid.
    pub fn node_name(&self, id: NodeId) -> String {
        self.node(id)
            .map(|node| node.name().to_string())
            .unwrap_or_else(|| format!("[ID: {}]", id))
    }

    /// Return the type of a value or constant node.
    pub fn value_type(&self, id: NodeId) -> Option<TensorType> {
        self.node(id).and_then(|node| node.ty())
    }

    /// Return the value of a constant node.
    pub fn constant(&self, id: NodeId) -> Option<&Tensor> {
        self.node(id)
            .and_then(|node| node.as_constant())
            .map(|c| c.value())
    }

    /// Return the operator which produces a value.
    pub fn producer(&self, value_id: NodeId) -> Option<NodeId> {
        self.producers.get(&value_id).copied()
    }

    /// Return the producing operator of a value.
    pub fn producer_op(&self, value_id: NodeId) -> Option<&OperatorNode> {
        self.producer(value_id)
            .and_then(|op_id| self.node(op_id))
            .and_then(|node| node.as_operator())
    }

    pub fn input_ids(&self) -> &[NodeId] {
        &self.input_ids
    }

    pub fn output_ids(&self) -> &[NodeId] {
        &self.output_ids
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn captures(&self) -> &[NodeId] {
        &self.captures
    }

    pub fn is_capture(&self, id: NodeId) -> bool {
        self.captures.contains(&id)
    }

    /// Return the names of values this block captures from its enclosing
    /// scope.
    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.captures
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|node| node.name())
    }

    /// Return operator node IDs in program order.
    pub fn op_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Iterate over operators in program order.
    pub fn operators(&self) -> impl Iterator<Item = (NodeId, &OperatorNode)> {
        self.order
            .iter()
            .filter_map(|id| Some((*id, self.node(*id)?.as_operator()?)))
    }

    /// Iterate over all nodes, in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_ref().map(|n| (NodeId::from_u32(i as u32), n)))
    }

    /// Iterate over constant nodes, in the order they were added.
    pub fn constants(&self) -> impl Iterator<Item = (NodeId, &ConstantNode)> {
        self.iter()
            .filter_map(|(id, node)| node.as_constant().map(|c| (id, c)))
    }

    /// Return the number of operators in this block, excluding nested
    /// blocks.
    pub fn num_ops(&self) -> usize {
        self.order.len()
    }

    /// Count operators by kind, including operators in nested blocks.
    /// Constants are counted as "const".
    pub fn op_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        self.add_op_counts(&mut counts);
        counts
    }

    fn add_op_counts(&self, counts: &mut BTreeMap<&'static str, usize>) {
        let n_consts = self.constants().count();
        if n_consts > 0 {
            *counts.entry("const").or_insert(0) += n_consts;
        }
        for (_, op) in self.operators() {
            *counts.entry(op.kind()).or_insert(0) += 1;
            for block in op.blocks() {
                block.add_op_counts(counts);
            }
        }
    }

    /// Return the input and output types of this block.
    pub fn interface(&self) -> BlockInterface {
        let types = |ids: &[NodeId]| -> Vec<TensorType> {
            ids.iter().filter_map(|id| self.value_type(*id)).collect()
        };
        BlockInterface {
            inputs: types(&self.input_ids),
            outputs: types(&self.output_ids),
        }
    }

    /// Return the names and types of this block's inputs and outputs.
    pub fn signature(&self) -> BlockSignature {
        let inputs = self
            .input_ids
            .iter()
            .filter_map(|id| {
                Some(NamedType {
                    name: self.node(*id)?.name().to_string(),
                    ty: self.value_type(*id)?,
                })
            })
            .collect();
        let outputs = self
            .output_ids
            .iter()
            .zip(&self.output_names)
            .filter_map(|(id, name)| {
                Some(NamedType {
                    name: name.clone(),
                    ty: self.value_type(*id)?,
                })
            })
            .collect();
        BlockSignature { inputs, outputs }
    }

    /// Verify the structural invariants of this block and its nested
    /// blocks.
    ///
    /// Checks that every operator only consumes values that are available
    /// at its position in program order, that values captured by nested
    /// blocks are available in this block, and that outputs refer to
    /// available values.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.output_ids.len() != self.output_names.len() {
            return Err(format!(
                "block has {} outputs but {} output names",
                self.output_ids.len(),
                self.output_names.len()
            ));
        }

        let mut available: FxHashSet<NodeId> = self
            .input_ids
            .iter()
            .chain(&self.captures)
            .copied()
            .collect();
        available.extend(self.constants().map(|(id, _)| id));

        for &op_id in &self.order {
            let Some(op) = self.node(op_id).and_then(|n| n.as_operator()) else {
                return Err(format!("node {} in program order is not an operator", op_id));
            };
            for input_id in op.input_ids() {
                if !available.contains(&input_id) {
                    return Err(format!(
                        "operator \"{}\" uses \"{}\" before it is defined",
                        op.name(),
                        self.node_name(input_id)
                    ));
                }
            }
            for name in op.capture_names() {
                let captured = self.node_id(name).filter(|id| available.contains(id));
                if captured.is_none() {
                    return Err(format!(
                        "operator \"{}\" captures \"{}\" which is not defined",
                        op.name(),
                        name
                    ));
                }
            }
            for block in op.blocks() {
                block
                    .check_invariants()
                    .map_err(|err| format!("in block of \"{}\": {}", op.name(), err))?;
            }
            for &output_id in op.output_ids() {
                if self.node(output_id).and_then(|n| n.as_value()).is_none() {
                    return Err(format!(
                        "output {} of operator \"{}\" is not a value",
                        output_id,
                        op.name()
                    ));
                }
                available.insert(output_id);
            }
        }

        for &output_id in &self.output_ids {
            if !available.contains(&output_id) {
                return Err(format!(
                    "block output \"{}\" is not defined",
                    self.node_name(output_id)
                ));
            }
        }

        Ok(())
    }

    /// Run type inference for an operator with inputs bound to nodes in
    /// this block.
    pub(crate) fn infer_op(
        &self,
        op: &dyn Operator,
        inputs: &[OpInput],
        attrs: &BTreeMap<&'static str, Attr>,
        blocks: &[Block],
        target: TargetVersion,
    ) -> Result<Vec<TensorType>, InferError> {
        let types = inputs
            .iter()
            .map(|input| {
                self.value_type(input.id).ok_or_else(|| {
                    InferError::InvalidValue(format!("input \"{}\" is not a value", input.param))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let infer_inputs: Vec<InferInput> = inputs
            .iter()
            .zip(&types)
            .map(|(input, ty)| InferInput {
                param: input.param,
                ty,
                value: self.constant(input.id),
            })
            .collect();
        let interfaces: Vec<BlockInterface> = blocks.iter().map(|b| b.interface()).collect();
        let ctx = InferContext::new(&infer_inputs, attrs, &interfaces, target);
        op.infer(&ctx)
    }

    /// Evaluate an operator whose inputs are all constants.
    ///
    /// Returns `Ok(None)` if the operator has non-constant inputs, nested
    /// blocks or doesn't support value inference.
    pub(crate) fn eval_op(
        &self,
        op_id: NodeId,
        target: TargetVersion,
    ) -> Result<Option<Vec<Tensor>>, InferError> {
        let Some(op) = self.node(op_id).and_then(|n| n.as_operator()) else {
            return Ok(None);
        };
        if !op.blocks().is_empty() {
            return Ok(None);
        }
        let Some(value_inference) = op.operator().value_inference() else {
            return Ok(None);
        };
        let Some(values) = op
            .input_ids()
            .map(|id| self.constant(id))
            .collect::<Option<Vec<&Tensor>>>()
        else {
            return Ok(None);
        };
        let types: Vec<TensorType> = values.iter().map(|v| v.tensor_type()).collect();
        let infer_inputs: Vec<InferInput> = op
            .inputs()
            .iter()
            .zip(values.iter().zip(&types))
            .map(|(input, (value, ty))| InferInput {
                param: input.param,
                ty,
                value: Some(*value),
            })
            .collect();
        let ctx = InferContext::new(&infer_inputs, op.attrs(), &[], target);
        let outputs = value_inference.eval(&ctx)?;
        Ok(outputs.filter(|outputs| outputs.len() == op.output_ids().len()))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);

        let inputs: Vec<String> = self
            .signature()
            .inputs
            .iter()
            .map(|input| format!("{}: {}", input.name, input.ty))
            .collect();
        writeln!(f, "({}) {{", inputs.join(", "))?;

        for (_, constant) in self.constants() {
            writeln!(
                f,
                "{}  const {}: {} = {:?}",
                pad,
                constant.name(),
                constant.value().tensor_type(),
                constant.value()
            )?;
        }
        for (_, op) in self.operators() {
            let outputs: Vec<String> = op
                .output_ids()
                .iter()
                .map(|id| {
                    let ty = self.value_type(*id).map(|t| t.to_string()).unwrap_or_default();
                    format!("{}: {}", self.node_name(*id), ty)
                })
                .collect();
            let args: Vec<String> = op
                .inputs()
                .iter()
                .map(|input| format!("{}={}", input.param, self.node_name(input.id)))
                .chain(op.attrs().iter().map(|(name, val)| format!("{}={:?}", name, val)))
                .collect();
            write!(
                f,
                "{}  {} = {}({})",
                pad,
                outputs.join(", "),
                op.kind(),
                args.join(", ")
            )?;
            if op.blocks().is_empty() {
                writeln!(f)?;
            }
            for block in op.blocks() {
                write!(f, " ")?;
                block.fmt_indented(f, indent + 1)?;
                writeln!(f)?;
            }
        }

        let outputs: Vec<String> = self
            .output_names
            .iter()
            .zip(&self.output_ids)
            .map(|(name, id)| {
                let value_name = self.node_name(*id);
                if *name == value_name {
                    value_name
                } else {
                    format!("{}={}", name, value_name)
                }
            })
            .collect();
        write!(f, "{}}} -> ({})", pad, outputs.join(", "))
    }
}

impl fmt::Display for Block {
    /// Format the block as text, one line per constant and operator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
