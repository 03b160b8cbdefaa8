use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::{Block, NodeId, OpInput, OperatorNode};
use crate::op_registry::OpRef;
use crate::program::BuildError;
use crate::target::TargetVersion;
use crate::types::DataType;
use crate::value::Attr;

use super::{BlockPass, GraphMutator, OptimizeError, PassContext, Precision};

/// An op input whose float constants stay fp32 when computing in fp16.
#[derive(Clone, Debug, PartialEq)]
pub struct PrecisionRule {
    pub kind: &'static str,
    pub input: &'static str,

    /// Oldest target which accepts an fp32 value for this input in an
    /// otherwise fp16 op.
    pub since: TargetVersion,
}

/// Table of [`PrecisionRule`]s consulted by the [`Fp16Precision`] pass.
///
/// Some parameters lose their meaning when rounded to fp16. For example
/// `log`'s default epsilon of 1e-45 becomes zero. Newer targets let these
/// inputs stay fp32.
#[derive(Clone, Debug, PartialEq)]
pub struct PrecisionTable {
    rules: Vec<PrecisionRule>,
}

impl PrecisionTable {
    pub fn new(rules: Vec<PrecisionRule>) -> PrecisionTable {
        PrecisionTable { rules }
    }

    /// Return a table with no rules. Every float constant is converted.
    pub fn empty() -> PrecisionTable {
        PrecisionTable { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[PrecisionRule] {
        &self.rules
    }

    pub fn add(&mut self, kind: &'static str, input: &'static str, since: TargetVersion) {
        self.rules.push(PrecisionRule { kind, input, since });
    }

    /// Return true if input `input` of an op of kind `kind` stays fp32 at
    /// `target`.
    pub fn keeps_fp32(&self, kind: &str, input: &str, target: TargetVersion) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.kind == kind && rule.input == input && target >= rule.since)
    }
}

impl Default for PrecisionTable {
    fn default() -> Self {
        let mut table = PrecisionTable::empty();
        table.add("log", "epsilon", TargetVersion::Ios17);
        table.add("elu", "alpha", TargetVersion::Ios17);
        table.add("leaky_relu", "alpha", TargetVersion::Ios17);
        table.add("linear_activation", "alpha", TargetVersion::Ios17);
        table.add("linear_activation", "beta", TargetVersion::Ios17);
        table
    }
}

/// Convert fp32 computations to fp16.
///
/// Outputs of eligible ops change type to fp16. fp32 constants consumed by
/// eligible ops are replaced with fp16 copies, unless the
/// [`PrecisionTable`] says the input stays fp32, and casts are inserted
/// for fp32 runtime values. Operations with nested blocks, casts and the
/// producers of values captured by nested blocks stay fp32, with casts
/// inserted around them. Block inputs and outputs keep their types.
///
/// Does nothing unless the options request [`Precision::Float16`].
pub struct Fp16Precision {}

/// Rewrite state for one block.
struct Converter<'a, 'c> {
    block: GraphMutator,
    ctx: &'a PassContext<'c>,
    cast: OpRef,

    /// Map of fp32 value or constant to its fp16 equivalent.
    fp16_of: FxHashMap<NodeId, NodeId>,

    /// Map of converted value to an fp32 cast of it.
    fp32_of: FxHashMap<NodeId, NodeId>,

    /// Operator outputs whose type was changed to fp16.
    converted: FxHashSet<NodeId>,
}

impl Converter<'_, '_> {
    /// Insert `cast(value, dtype)` before `before`, or at the end of the
    /// block if `None`, and return the cast's output.
    fn insert_cast(&mut self, value_id: NodeId, dtype: DataType, before: Option<NodeId>) -> NodeId {
        let ty = self
            .block
            .block()
            .value_type(value_id)
            .expect("cast input should be a value")
            .with_dtype(dtype);
        let prefix = format!("{}_{}", self.block.block().node_name(value_id), dtype.name());
        let name = self.block.block().unique_name(&prefix, self.ctx.env());
        let output_id = self.block.add_value(&name, ty);

        let op = OperatorNode::new(
            &name,
            self.cast.clone(),
            vec![OpInput {
                param: "x",
                id: value_id,
            }],
            [("dtype", Attr::from(dtype.name()))].into(),
            vec![output_id],
            Vec::new(),
        );
        let index = before
            .and_then(|op_id| self.block.op_index(op_id))
            .unwrap_or(self.block.block().op_order().len());
        self.block.insert_op(index, op);
        output_id
    }

    /// Return an fp16 equivalent of an fp32 value or constant.
    fn fp16_version(&mut self, value_id: NodeId, before: NodeId) -> NodeId {
        if let Some(id) = self.fp16_of.get(&value_id) {
            return *id;
        }
        let fp16_constant = self
            .block
            .block()
            .constant(value_id)
            .and_then(|value| value.cast(DataType::Float16));
        let id = match fp16_constant {
            Some(value) => {
                let prefix = format!("{}_fp16", self.block.block().node_name(value_id));
                let name = self.block.block().unique_name(&prefix, self.ctx.env());
                self.block.add_constant(&name, value)
            }
            None => self.insert_cast(value_id, DataType::Float16, Some(before)),
        };
        self.fp16_of.insert(value_id, id);
        id
    }

    /// Return an fp32 cast of a converted value.
    fn fp32_version(&mut self, value_id: NodeId, before: Option<NodeId>) -> NodeId {
        if let Some(id) = self.fp32_of.get(&value_id) {
            return *id;
        }
        let id = self.insert_cast(value_id, DataType::Float32, before);
        self.fp32_of.insert(value_id, id);
        id
    }

    fn is_fp32(&self, value_id: NodeId) -> bool {
        self.block
            .block()
            .value_type(value_id)
            .is_some_and(|ty| ty.dtype() == DataType::Float32)
    }

    fn convert_op(&mut self, op_id: NodeId, captured: &FxHashSet<NodeId>) -> Result<(), OptimizeError> {
        let Some(op) = self.block.block().node(op_id).and_then(|n| n.as_operator()) else {
            return Ok(());
        };
        let kind = op.kind();
        let inputs: Vec<(usize, &'static str, NodeId)> = op
            .inputs()
            .iter()
            .enumerate()
            .map(|(i, input)| (i, input.param, input.id))
            .collect();
        let outputs = op.output_ids().to_vec();

        let eligible = op.blocks().is_empty()
            && kind != "cast"
            && !outputs.iter().any(|id| captured.contains(id));

        if !eligible {
            for (index, _, id) in inputs {
                if self.converted.contains(&id) {
                    let id32 = self.fp32_version(id, Some(op_id));
                    self.block.set_op_input(op_id, index, id32);
                }
            }
            return Ok(());
        }

        let has_fp32 = inputs.iter().any(|(_, _, id)| self.is_fp32(*id))
            || outputs.iter().any(|id| self.is_fp32(*id))
            || inputs.iter().any(|(_, _, id)| self.converted.contains(id));
        if !has_fp32 {
            return Ok(());
        }

        let ctx = self.ctx;
        let table = &ctx.options().precision_table;
        let target = ctx.target();
        for (index, param, id) in inputs {
            let keep_fp32 = table.keeps_fp32(kind, param, target);
            if self.converted.contains(&id) {
                if keep_fp32 {
                    let id32 = self.fp32_version(id, Some(op_id));
                    self.block.set_op_input(op_id, index, id32);
                }
                continue;
            }
            if keep_fp32 || !self.is_fp32(id) {
                continue;
            }
            let id16 = self.fp16_version(id, op_id);
            self.block.set_op_input(op_id, index, id16);
        }

        for output_id in &outputs {
            if let Some(ty) = self.block.block().value_type(*output_id) {
                if ty.dtype() == DataType::Float32 {
                    self.block
                        .set_value_type(*output_id, ty.with_dtype(DataType::Float16));
                    self.converted.insert(*output_id);
                }
            }
        }

        // Check the op accepts its new input types and produces the types
        // recorded for its outputs.
        let block = self.block.block();
        let op = block
            .node(op_id)
            .and_then(|n| n.as_operator())
            .expect("converted op should exist");
        let inferred = block
            .infer_op(op.operator(), op.inputs(), op.attrs(), &[], self.ctx.target())
            .map_err(|error| {
                OptimizeError::Build(BuildError::Infer {
                    kind: kind.to_string(),
                    name: Some(op.name().to_string()),
                    error,
                })
            })?;
        let recorded: Vec<_> = outputs.iter().filter_map(|id| block.value_type(*id)).collect();
        if inferred != recorded {
            return Err(OptimizeError::InvariantViolation {
                pass: "fp16_precision",
                detail: format!(
                    "operator \"{}\" infers {:?} but outputs are {:?}",
                    op.name(),
                    inferred,
                    recorded
                ),
            });
        }

        Ok(())
    }
}

impl BlockPass for Fp16Precision {
    fn name(&self) -> &'static str {
        "fp16_precision"
    }

    fn rewrite(&self, block: Block, ctx: &PassContext) -> Result<Block, OptimizeError> {
        if ctx.options().precision != Precision::Float16 {
            return Ok(block);
        }
        let Some(cast) = ctx.registry().get("cast").cloned() else {
            log::warn!("fp16 precision skipped: \"cast\" is not registered");
            return Ok(block);
        };

        // Nested blocks see captured values with the types they had when
        // the nested block was built.
        let captured: FxHashSet<NodeId> = block
            .operators()
            .flat_map(|(_, op)| op.capture_names())
            .filter_map(|name| block.node_id(name))
            .collect();

        let mut converter = Converter {
            block: GraphMutator::from_block(block),
            ctx,
            cast,
            fp16_of: FxHashMap::default(),
            fp32_of: FxHashMap::default(),
            converted: FxHashSet::default(),
        };

        for op_id in converter.block.block().op_order().to_vec() {
            converter.convert_op(op_id, &captured)?;
        }

        let outputs: Vec<NodeId> = converter.block.block().output_ids().to_vec();
        let outputs: Vec<NodeId> = outputs
            .into_iter()
            .map(|id| {
                if converter.converted.contains(&id) {
                    converter.fp32_version(id, None)
                } else {
                    id
                }
            })
            .collect();
        converter.block.set_output_ids(outputs);

        // fp32 constants replaced by fp16 copies.
        let replaced: Vec<NodeId> = converter.fp16_of.keys().copied().collect();
        converter.block.remove_dead(replaced);

        Ok(converter.block.into_block())
    }
}

#[cfg(test)]
mod tests {
    use super::PrecisionTable;
    use crate::target::TargetVersion;

    #[test]
    fn test_default_table() {
        let table = PrecisionTable::default();
        assert!(table.keeps_fp32("log", "epsilon", TargetVersion::Ios17));
        assert!(table.keeps_fp32("log", "epsilon", TargetVersion::Ios18));
        assert!(!table.keeps_fp32("log", "epsilon", TargetVersion::Ios16));
        assert!(!table.keeps_fp32("log", "x", TargetVersion::Ios18));
        assert!(table.keeps_fp32("linear_activation", "beta", TargetVersion::Ios17));
        assert!(!PrecisionTable::empty().keeps_fp32("elu", "alpha", TargetVersion::Ios26));
    }
}
