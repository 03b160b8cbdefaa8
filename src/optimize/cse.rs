use rustc_hash::FxHashMap;

use crate::graph::{Block, NodeId};
use crate::value::Tensor;

use super::{BlockPass, GraphMutator, OptimizeError, PassContext};

/// Structural identity of an operation, excluding attributes.
///
/// Attributes are compared separately since they may contain floats.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct OpKey {
    kind: &'static str,
    inputs: Vec<(&'static str, NodeId)>,
}

/// Merge duplicate constants and operations which have the same kind,
/// inputs and attributes.
///
/// Consumers of a duplicate are rewritten to use the first occurrence in
/// program order. Operations with nested blocks are not merged.
pub struct CommonSubexpressionElimination {}

impl CommonSubexpressionElimination {
    fn merge_constants(block: &mut GraphMutator) -> usize {
        let constants: Vec<(NodeId, Tensor)> = block
            .block()
            .constants()
            .map(|(id, c)| (id, c.value().clone()))
            .collect();

        let mut survivors: Vec<(NodeId, Tensor)> = Vec::new();
        let mut merged = 0;
        for (id, value) in constants {
            if let Some((survivor, _)) = survivors.iter().find(|(_, v)| *v == value) {
                block.replace_value(id, *survivor);
                block.remove_value(id);
                merged += 1;
            } else {
                survivors.push((id, value));
            }
        }
        merged
    }
}

impl BlockPass for CommonSubexpressionElimination {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn rewrite(&self, block: Block, ctx: &PassContext) -> Result<Block, OptimizeError> {
        let mut block = GraphMutator::from_block(block);
        let merged_constants = Self::merge_constants(&mut block);

        let mut seen: FxHashMap<OpKey, Vec<NodeId>> = FxHashMap::default();
        let mut merged_ops = 0;

        for op_id in block.block().op_order().to_vec() {
            let Some(op) = block.block().node(op_id).and_then(|n| n.as_operator()) else {
                continue;
            };
            if !op.blocks().is_empty() {
                continue;
            }

            let mut inputs: Vec<(&'static str, NodeId)> =
                op.inputs().iter().map(|input| (input.param, input.id)).collect();
            if op.operator().is_commutative() {
                let mut ids: Vec<NodeId> = inputs.iter().map(|(_, id)| *id).collect();
                ids.sort();
                for ((_, id), sorted_id) in inputs.iter_mut().zip(ids) {
                    *id = sorted_id;
                }
            }
            let key = OpKey {
                kind: op.kind(),
                inputs,
            };

            let candidates = seen.entry(key).or_default();
            let survivor = candidates.iter().copied().find(|candidate| {
                let Some(other) = block.block().node(*candidate).and_then(|n| n.as_operator())
                else {
                    return false;
                };
                other.attrs() == op.attrs() && other.output_ids().len() == op.output_ids().len()
            });

            let Some(survivor) = survivor else {
                candidates.push(op_id);
                continue;
            };

            let old_outputs = op.output_ids().to_vec();
            let new_outputs = block
                .block()
                .node(survivor)
                .and_then(|n| n.as_operator())
                .map(|op| op.output_ids().to_vec())
                .unwrap_or_default();

            ctx.diagnostics().info(
                block.block(),
                op_id,
                format_args!("merged with \"{}\"", block.block().node_name(new_outputs[0])),
            );
            block.remove_op(op_id);
            for (old, new) in old_outputs.into_iter().zip(new_outputs) {
                block.replace_value(old, new);
                block.remove_value(old);
            }
            merged_ops += 1;
        }

        if merged_constants + merged_ops > 0 {
            log::debug!(
                target: "milc::optimize",
                "merged {} constants and {} ops",
                merged_constants,
                merged_ops
            );
        }

        Ok(block.into_block())
    }
}
