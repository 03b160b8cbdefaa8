//! Rewrite passes which simplify programs before lowering.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::env::{env_flag, env_value};
use crate::graph::{Block, Node, NodeId, OpInput, OperatorNode, ScopeEnv};
use crate::op_registry::OpRegistry;
use crate::program::{BuildError, Program};
use crate::target::TargetVersion;
use crate::types::TensorType;
use crate::value::{Attr, Tensor};

mod const_fold;
mod cse;
mod dce;
mod diagnostics;
mod fusions;
mod pattern_matcher;
mod precision;
mod redundant;


pub use const_fold::ConstantFolding;
pub use cse::CommonSubexpressionElimination;
pub use dce::DeadCodeElimination;
pub use diagnostics::{DiagnosticLevel, Diagnostics, ParseLevelError};
pub use fusions::FuseOps;
pub use precision::{Fp16Precision, PrecisionRule, PrecisionTable};
pub use redundant::RemoveRedundantOps;

/// Errors that occur while applying block optimizations.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizeError {
    /// A pass changed a block's interface or produced a block which uses
    /// values before they are defined.
    ///
    /// This indicates a bug in the pass.
    InvariantViolation { pass: &'static str, detail: String },

    /// Re-running inference for a rewritten operation failed.
    Build(BuildError),
}

impl Display for OptimizeError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::InvariantViolation { pass, detail } => {
                write!(f, "pass \"{}\" broke a block invariant: {}", pass, detail)
            }
            Self::Build(err) => write!(f, "rewritten operation is invalid: {}", err),
        }
    }
}

impl Error for OptimizeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvariantViolation { .. } => None,
            Self::Build(err) => Some(err),
        }
    }
}

impl From<BuildError> for OptimizeError {
    fn from(err: BuildError) -> Self {
        OptimizeError::Build(err)
    }
}

/// Element type used for float computations in the optimized program.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Float32,

    /// Compute in fp16, except where the [`PrecisionTable`] says an input
    /// must stay fp32.
    Float16,
}

/// Options which control the optimization pipeline.
#[derive(Clone, Debug)]
pub struct OptimizeOptions {
    pub precision: Precision,
    pub precision_table: PrecisionTable,
    pub diagnostics: DiagnosticLevel,

    /// Whether to fuse subgraphs into single ops.
    pub fusion: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        OptimizeOptions {
            precision: Precision::Float32,
            precision_table: PrecisionTable::default(),
            diagnostics: DiagnosticLevel::Off,
            fusion: true,
        }
    }
}

impl OptimizeOptions {
    /// Create options from defaults overridden by environment variables.
    ///
    /// - `MILC_FP16`: Compute in fp16 if true.
    /// - `MILC_NO_FUSION`: Disable fusions if true.
    /// - `MILC_OPTIMIZE_DIAGNOSTICS`: One of "off", "warn" or "info".
    pub fn from_env() -> Self {
        let defaults = OptimizeOptions::default();
        let precision = if env_flag("MILC_FP16", false) {
            Precision::Float16
        } else {
            Precision::Float32
        };
        OptimizeOptions {
            precision,
            fusion: !env_flag("MILC_NO_FUSION", false),
            diagnostics: env_value("MILC_OPTIMIZE_DIAGNOSTICS", defaults.diagnostics),
            ..defaults
        }
    }
}

/// State shared by passes while rewriting one block.
pub struct PassContext<'a> {
    target: TargetVersion,

    /// Scopes enclosing the block being rewritten. `None` for a function's
    /// root block.
    env: Option<&'a ScopeEnv<'a>>,

    /// Op kinds available to rewrites which create operations.
    registry: &'a OpRegistry,
    options: &'a OptimizeOptions,
    diagnostics: &'a Diagnostics,
}

impl<'a> PassContext<'a> {
    pub fn new(
        target: TargetVersion,
        registry: &'a OpRegistry,
        options: &'a OptimizeOptions,
        diagnostics: &'a Diagnostics,
    ) -> PassContext<'a> {
        PassContext {
            target,
            env: None,
            registry,
            options,
            diagnostics,
        }
    }

    /// Return a context for a block nested in the scopes given by `env`.
    pub fn with_env<'b>(&'b self, env: &'b ScopeEnv<'b>) -> PassContext<'b> {
        PassContext {
            target: self.target,
            env: Some(env),
            registry: self.registry,
            options: self.options,
            diagnostics: self.diagnostics,
        }
    }

    pub fn target(&self) -> TargetVersion {
        self.target
    }

    pub fn env(&self) -> Option<&'a ScopeEnv<'a>> {
        self.env
    }

    pub fn registry(&self) -> &'a OpRegistry {
        self.registry
    }

    pub fn options(&self) -> &'a OptimizeOptions {
        self.options
    }

    pub fn diagnostics(&self) -> &'a Diagnostics {
        self.diagnostics
    }
}

/// A rewrite which consumes a block and produces an equivalent one.
///
/// A pass only rewrites the block it is given. The [`GraphOptimizer`]
/// applies it to nested blocks first, then to the enclosing block. The
/// returned block must have the same [`signature`](Block::signature) as the
/// input.
pub trait BlockPass: Send + Sync {
    fn name(&self) -> &'static str;

    fn rewrite(&self, block: Block, ctx: &PassContext) -> Result<Block, OptimizeError>;
}

/// Return the passes run by [`GraphOptimizer::with_options`].
pub fn default_pipeline(options: &OptimizeOptions) -> Vec<Box<dyn BlockPass>> {
    let mut passes: Vec<Box<dyn BlockPass>> = vec![
        Box::new(ConstantFolding {}),
        Box::new(CommonSubexpressionElimination {}),
        Box::new(RemoveRedundantOps {}),
    ];
    if options.fusion {
        passes.push(Box::new(FuseOps {}));
    }
    passes.push(Box::new(ConstantFolding {}));
    if options.precision == Precision::Float16 {
        passes.push(Box::new(Fp16Precision {}));
    }
    passes.push(Box::new(CommonSubexpressionElimination {}));
    passes.push(Box::new(DeadCodeElimination {}));
    passes
}

/// Applies a sequence of [`BlockPass`]es to the functions of a [`Program`].
pub struct GraphOptimizer {
    options: OptimizeOptions,
    passes: Vec<Box<dyn BlockPass>>,
    registry: Arc<OpRegistry>,
}

impl GraphOptimizer {
    /// Create a new optimizer with the default options and pipeline.
    pub fn new() -> Self {
        Self::with_options(OptimizeOptions::default())
    }

    /// Create an optimizer which runs the default pipeline for `options`.
    pub fn with_options(options: OptimizeOptions) -> Self {
        let passes = default_pipeline(&options);
        Self::with_passes(options, passes)
    }

    /// Create an optimizer which runs a custom sequence of passes.
    pub fn with_passes(options: OptimizeOptions, passes: Vec<Box<dyn BlockPass>>) -> Self {
        GraphOptimizer {
            options,
            passes,
            registry: OpRegistry::global(),
        }
    }

    /// Use `registry` for operations created by rewrites, instead of the
    /// global registry.
    ///
    /// Fusions into op kinds which are missing from the registry are
    /// skipped.
    pub fn with_registry(mut self, registry: Arc<OpRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> &OptimizeOptions {
        &self.options
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Optimize every function in a program.
    ///
    /// The interface of each function's block is preserved. Other nodes may
    /// be modified, removed or replaced.
    pub fn optimize(&self, mut program: Program) -> Result<Program, OptimizeError> {
        let target = program.target();
        let diagnostics = Diagnostics::new(self.options.diagnostics);
        for (name, function) in program.functions_mut() {
            log::debug!("optimizing function \"{}\"", name);
            let block = std::mem::take(function.block_mut());
            *function.block_mut() = self.optimize_block_with(block, target, &diagnostics)?;
        }
        Ok(program)
    }

    /// Optimize a function's root block.
    pub fn optimize_block(&self, block: Block, target: TargetVersion) -> Result<Block, OptimizeError> {
        let diagnostics = Diagnostics::new(self.options.diagnostics);
        self.optimize_block_with(block, target, &diagnostics)
    }

    fn optimize_block_with(
        &self,
        mut block: Block,
        target: TargetVersion,
        diagnostics: &Diagnostics,
    ) -> Result<Block, OptimizeError> {
        let ctx = PassContext::new(target, &self.registry, &self.options, diagnostics);
        for pass in &self.passes {
            block = self.run_pass(pass.as_ref(), block, &ctx)?;
            log::debug!(
                "after {}: {} ops",
                pass.name(),
                block.op_counts().values().sum::<usize>()
            );
        }
        Ok(block)
    }

    /// Run a pass over the nested blocks of `block` and then `block` itself.
    fn run_pass(
        &self,
        pass: &dyn BlockPass,
        mut block: Block,
        ctx: &PassContext,
    ) -> Result<Block, OptimizeError> {
        let signature = block.signature();

        // The branches of one operation are independent, so can be rewritten
        // in parallel. Blocks of different operations are rewritten in turn
        // so that names generated in one are visible to the next.
        for op_id in block.op_order().to_vec() {
            let Some(children) = block.op_mut(op_id).map(|op| op.take_blocks()) else {
                continue;
            };
            if children.is_empty() {
                continue;
            }
            let rewritten = {
                let env = match ctx.env() {
                    Some(parent) => parent.child(&block),
                    None => ScopeEnv::new(&block),
                };
                let child_ctx = ctx.with_env(&env);
                children
                    .into_par_iter()
                    .map(|child| self.run_pass(pass, child, &child_ctx))
                    .collect::<Result<Vec<_>, _>>()?
            };
            if let Some(op) = block.op_mut(op_id) {
                op.set_blocks(rewritten);
            }
        }

        let block = pass.rewrite(block, ctx)?;

        let new_signature = block.signature();
        if new_signature != signature {
            return Err(OptimizeError::InvariantViolation {
                pass: pass.name(),
                detail: format!(
                    "block signature changed from {:?} to {:?}",
                    signature, new_signature
                ),
            });
        }
        block
            .check_invariants()
            .map_err(|detail| OptimizeError::InvariantViolation {
                pass: pass.name(),
                detail,
            })?;

        Ok(block)
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Return the values an operator depends on: its inputs plus the values its
/// nested blocks capture from `block`.
fn op_dependencies(block: &Block, op: &OperatorNode) -> Vec<NodeId> {
    let mut deps: Vec<NodeId> = op.input_ids().collect();
    deps.extend(
        op.capture_names()
            .into_iter()
            .filter_map(|name| block.node_id(name)),
    );
    deps
}

/// Holds a [`Block`] and associated data structures while it is being
/// mutated by a pass, and provides operations to update the block.
pub(crate) struct GraphMutator {
    /// Map of (value_node_id, operator_node_ids) for each value node that
    /// is an input to, or captured by, one or more operators. An operator
    /// appears once for each input bound to the value.
    edges: FxHashMap<NodeId, Vec<NodeId>>,
    block: Block,
}

impl GraphMutator {
    pub fn from_block(block: Block) -> GraphMutator {
        let mut edges: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for (op_id, op) in block.operators() {
            for dep in op_dependencies(&block, op) {
                edges.entry(dep).or_default().push(op_id);
            }
        }
        GraphMutator { edges, block }
    }

    /// Return a reference to the block.
    ///
    /// Note there is no mutable variant of this method. All block updates
    /// must be done via methods of this struct.
    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn into_block(self) -> Block {
        self.block
    }

    /// Return the operators which consume a value.
    pub fn consumers(&self, value_id: NodeId) -> &[NodeId] {
        self.edges.get(&value_id).map(|ops| ops.as_slice()).unwrap_or(&[])
    }

    /// Return true if a value is consumed by an operator or is a block
    /// output.
    pub fn is_used(&self, value_id: NodeId) -> bool {
        !self.consumers(value_id).is_empty() || self.block.output_ids().contains(&value_id)
    }

    pub fn add_constant(&mut self, name: &str, value: Tensor) -> NodeId {
        self.block.add_constant(name, value)
    }

    pub fn add_value(&mut self, name: &str, ty: TensorType) -> NodeId {
        self.block.add_value(name, ty)
    }

    /// Insert an operator at position `index` in program order.
    pub fn insert_op(&mut self, index: usize, op: OperatorNode) -> NodeId {
        let deps = op_dependencies(&self.block, &op);
        let op_id = self.block.insert_op(index, op);
        for dep in deps {
            self.edges.entry(dep).or_default().push(op_id);
        }
        op_id
    }

    /// Remove an operator. Its output values are kept.
    pub fn remove_op(&mut self, op_id: NodeId) -> Option<OperatorNode> {
        let deps = {
            let op = self.block.node(op_id)?.as_operator()?;
            op_dependencies(&self.block, op)
        };
        for dep in deps {
            if let Some(consumers) = self.edges.get_mut(&dep) {
                consumers.retain(|id| *id != op_id);
            }
        }
        self.block.remove_op(op_id)
    }

    /// Replace an operator with a new one at the same position.
    pub fn replace_op(&mut self, op_id: NodeId, op: OperatorNode) -> Option<NodeId> {
        let index = self.op_index(op_id)?;
        self.remove_op(op_id)?;
        Some(self.insert_op(index, op))
    }

    /// Return the position of an operator in program order.
    pub fn op_index(&self, op_id: NodeId) -> Option<usize> {
        self.block.op_order().iter().position(|id| *id == op_id)
    }

    pub fn remove_value(&mut self, value_id: NodeId) {
        self.block.remove_value(value_id);
        self.edges.remove(&value_id);
    }

    /// Replace a value whose producer has been removed with a constant.
    pub fn convert_to_constant(&mut self, value_id: NodeId, value: Tensor) {
        self.block.convert_to_constant(value_id, value);
    }

    /// Replace a captured value with a local constant named `name`.
    ///
    /// Operators keep their edges, as the node ID is unchanged.
    pub fn convert_capture_to_constant(&mut self, capture_id: NodeId, name: &str, value: Tensor) {
        self.block.convert_capture_to_constant(capture_id, name, value);
    }

    pub fn set_value_type(&mut self, value_id: NodeId, ty: TensorType) {
        self.block.set_value_type(value_id, ty);
    }

    pub fn set_output_ids(&mut self, ids: Vec<NodeId>) {
        self.block.set_output_ids(ids);
    }

    /// Bind the input at `index` of an operator to a different value.
    pub fn set_op_input(&mut self, op_id: NodeId, index: usize, new_id: NodeId) {
        let Some(op) = self.block.op_mut(op_id) else {
            return;
        };
        let Some(old_id) = op.inputs().get(index).map(|input| input.id) else {
            return;
        };
        op.set_input(index, new_id);

        if let Some(consumers) = self.edges.get_mut(&old_id) {
            if let Some(pos) = consumers.iter().position(|id| *id == op_id) {
                consumers.remove(pos);
            }
        }
        self.edges.entry(new_id).or_default().push(op_id);
    }

    /// Replace `old_value_id` with `new_value_id` in operator inputs, nested
    /// block captures and block outputs.
    pub fn replace_value(&mut self, old_value_id: NodeId, new_value_id: NodeId) {
        if old_value_id == new_value_id {
            return;
        }

        let outputs: Vec<NodeId> = self
            .block
            .output_ids()
            .iter()
            .map(|id| if *id == old_value_id { new_value_id } else { *id })
            .collect();
        self.block.set_output_ids(outputs);

        let Some(old_value_op_ids) = self.edges.remove(&old_value_id) else {
            return;
        };

        let old_name = self.block.node_name(old_value_id);
        let new_name = self.block.node_name(new_value_id);
        let mut renamed = FxHashSet::default();
        for &op_id in &old_value_op_ids {
            let op = self
                .block
                .op_mut(op_id)
                .expect("edge should refer to an operator");
            op.replace_input(old_value_id, new_value_id);
            if renamed.insert(op_id) {
                op.rename_capture(&old_name, &new_name);
            }
        }

        self.edges
            .entry(new_value_id)
            .or_default()
            .extend(old_value_op_ids);
    }

    /// Remove values which are unused, along with operators all of whose
    /// outputs are unused, starting from `candidates` and continuing with
    /// the dependencies of anything removed.
    ///
    /// Block inputs are never removed. Returns the number of operators
    /// removed.
    pub fn remove_dead(&mut self, candidates: impl IntoIterator<Item = NodeId>) -> usize {
        let mut worklist: Vec<NodeId> = candidates.into_iter().collect();
        let mut removed_ops = 0;

        while let Some(value_id) = worklist.pop() {
            if self.is_used(value_id) || self.block.input_ids().contains(&value_id) {
                continue;
            }
            let is_constant = match self.block.node(value_id) {
                Some(Node::Constant(_)) => true,
                Some(Node::Value(_)) => false,
                Some(Node::Operator(_)) | None => continue,
            };
            if is_constant {
                self.remove_value(value_id);
                continue;
            }
            let Some(op_id) = self.block.producer(value_id) else {
                // An unused capture.
                if self.block.is_capture(value_id) {
                    self.remove_value(value_id);
                }
                continue;
            };
            let outputs = self
                .block
                .node(op_id)
                .and_then(|n| n.as_operator())
                .map(|op| op.output_ids().to_vec())
                .unwrap_or_default();
            if outputs.iter().any(|id| self.is_used(*id)) {
                continue;
            }
            let deps = self
                .block
                .node(op_id)
                .and_then(|n| n.as_operator())
                .map(|op| op_dependencies(&self.block, op))
                .unwrap_or_default();
            self.remove_op(op_id);
            removed_ops += 1;
            for output in outputs {
                self.remove_value(output);
            }
            worklist.extend(deps);
        }

        removed_ops
    }

    /// Return the operators which compute `output_ids` from `input_ids`, or
    /// `None` if they depend on a runtime value not in `input_ids`.
    fn fusion_subgraph(&self, input_ids: &[NodeId], output_ids: &[NodeId]) -> Option<Vec<NodeId>> {
        let mut ops = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack = output_ids.to_vec();

        while let Some(value_id) = stack.pop() {
            if input_ids.contains(&value_id) || !visited.insert(value_id) {
                continue;
            }
            match self.block.node(value_id)? {
                Node::Constant(_) => {}
                Node::Value(_) => {
                    let op_id = self.block.producer(value_id)?;
                    if !ops.contains(&op_id) {
                        let op = self.block.node(op_id)?.as_operator()?;
                        stack.extend(op_dependencies(&self.block, op));
                        ops.push(op_id);
                    }
                }
                Node::Operator(_) => return None,
            }
        }
        Some(ops)
    }

    /// Replace the subgraph computing `fusion.output_ids` with a single
    /// fused operator.
    ///
    /// `root_op` is the operator which produces the fusion's outputs.
    /// Returns false if the fusion could not be applied, in which case the
    /// block is unchanged.
    pub fn apply_fusion(&mut self, root_op: NodeId, fusion: Fusion, ctx: &PassContext) -> bool {
        let diagnostics = ctx.diagnostics();
        let value_inputs: Vec<NodeId> = fusion
            .inputs
            .iter()
            .filter_map(|(_, input)| match input {
                FusionInput::Value(id) => Some(*id),
                FusionInput::Constant(_) => None,
            })
            .collect();

        let Some(unfused_ops) = self.fusion_subgraph(&value_inputs, &fusion.output_ids) else {
            return false;
        };

        // Check for outputs of intermediate steps in the fused subgraph used
        // by operators outside of the subgraph. If any are found, we can't
        // fuse the subgraph as the intermediate value would no longer be
        // available.
        if let Some(reused) = find_operator_output_used_outside_subgraph(
            &self.block,
            &self.edges,
            &unfused_ops,
            &fusion.output_ids,
        ) {
            diagnostics.warn(
                &self.block,
                root_op,
                format_args!(
                    "not fusing into {}: \"{}\" is used outside the fused subgraph",
                    fusion.kind,
                    self.block.node_name(reused)
                ),
            );
            return false;
        }

        let Some(operator) = ctx.registry().get(fusion.kind).cloned() else {
            log::debug!("not fusing into {}: op is not registered", fusion.kind);
            return false;
        };

        let op_name = self.block.node_name(fusion.output_ids[0]);
        let mut new_constants = Vec::new();
        let inputs: Vec<OpInput> = fusion
            .inputs
            .into_iter()
            .map(|(param, input)| {
                let id = match input {
                    FusionInput::Value(id) => id,
                    FusionInput::Constant(value) => {
                        let name = self
                            .block
                            .unique_name(&format!("{}_{}", op_name, param), ctx.env());
                        let id = self.add_constant(&name, value);
                        new_constants.push(id);
                        id
                    }
                };
                OpInput { param, id }
            })
            .collect();

        // The fused op must produce exactly the types of the values it
        // replaces.
        let expected: Vec<Option<TensorType>> = fusion
            .output_ids
            .iter()
            .map(|id| self.block.value_type(*id))
            .collect();
        let inferred = self
            .block
            .infer_op(operator.as_ref(), &inputs, &fusion.attrs, &[], ctx.target());
        let types_match = match &inferred {
            Ok(types) => types.iter().cloned().map(Some).collect::<Vec<_>>() == expected,
            Err(_) => false,
        };
        if !types_match {
            diagnostics.warn(
                &self.block,
                root_op,
                format_args!("not fusing into {}: output types differ", fusion.kind),
            );
            for id in new_constants {
                self.remove_value(id);
            }
            return false;
        }

        let Some(root_pos) = self.op_index(root_op) else {
            return false;
        };
        let removed_before = unfused_ops
            .iter()
            .filter(|op_id| self.op_index(**op_id).is_some_and(|pos| pos < root_pos))
            .count();

        let mut dead_candidates = Vec::new();
        for op_id in &unfused_ops {
            let Some(op) = self.remove_op(*op_id) else {
                continue;
            };
            dead_candidates.extend(op.input_ids());
            for output in op.output_ids() {
                if !fusion.output_ids.contains(output) {
                    self.remove_value(*output);
                }
            }
        }

        let fused = OperatorNode::new(
            &op_name,
            operator,
            inputs,
            fusion.attrs,
            fusion.output_ids,
            Vec::new(),
        );
        let fused_id = self.insert_op(root_pos - removed_before, fused);
        self.remove_dead(dead_candidates);

        diagnostics.info(
            &self.block,
            fused_id,
            format_args!("fused {} ops into {}", unfused_ops.len(), fusion.kind),
        );
        true
    }
}

/// Find an operator output in a subgraph which is used outside the subgraph,
/// excluding outputs listed in `output_ids`, which are the final outputs of
/// the subgraph.
fn find_operator_output_used_outside_subgraph(
    block: &Block,
    edges: &FxHashMap<NodeId, Vec<NodeId>>,
    subgraph_ops: &[NodeId],
    output_ids: &[NodeId],
) -> Option<NodeId> {
    for op_id in subgraph_ops {
        let op = block
            .node(*op_id)
            .and_then(|n| n.as_operator())
            .expect("node ID should be a valid operator ID");

        for output in op.output_ids() {
            if output_ids.contains(output) {
                continue;
            }

            // Check for intermediate output used as block output.
            if block.output_ids().contains(output) {
                return Some(*output);
            }

            // Check for intermediate output used as input to operator node
            // outside subgraph.
            let Some(consumers) = edges.get(output) else {
                continue;
            };
            for consumer in consumers {
                if !subgraph_ops.contains(consumer) {
                    return Some(*output);
                }
            }
        }
    }
    None
}

/// An input of a fused operator.
pub(crate) enum FusionInput {
    /// An existing value or constant.
    Value(NodeId),

    /// A new constant, eg. a transposed weight.
    Constant(Tensor),
}

/// Defines a fused operator which replaces a subgraph.
pub(crate) struct Fusion {
    pub kind: &'static str,
    pub inputs: Vec<(&'static str, FusionInput)>,
    pub attrs: BTreeMap<&'static str, Attr>,

    /// Outputs of the subgraph which this fusion replaces. These become the
    /// fused operator's outputs.
    pub output_ids: Vec<NodeId>,
}
