use crate::graph::{Block, Node, NodeId};
use crate::value::Tensor;

use super::{BlockPass, GraphMutator, OptimizeError, PassContext};

/// Replace operations whose inputs are all constants with the constants
/// they compute.
///
/// Captured values which resolve to constants in an enclosing block are
/// first replaced with local copies of those constants, so that folding
/// can continue into nested blocks.
///
/// Folding visits operations in program order, so the outputs of one
/// folded operation are available to later ones in the same sweep and a
/// single sweep reaches a fixed point.
pub struct ConstantFolding {}

impl ConstantFolding {
    fn convert_captured_values_to_constants(block: &mut GraphMutator, ctx: &PassContext) {
        let Some(env) = ctx.env() else {
            return;
        };
        let captured_constants: Vec<(NodeId, String, Tensor)> = block
            .block()
            .captures()
            .iter()
            .filter_map(|&capture_id| {
                let name = block.block().node(capture_id)?.name();
                let Some(Node::Constant(const_node)) = env.get_node(name) else {
                    return None;
                };
                Some((capture_id, name.to_string(), const_node.value().clone()))
            })
            .collect();

        for (capture_id, name, value) in captured_constants {
            // The copy needs its own name, as the original stays defined in
            // the enclosing block.
            let local_name = block.block().unique_name(&name, Some(env));
            block.convert_capture_to_constant(capture_id, &local_name, value);
        }
    }
}

impl BlockPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "const_fold"
    }

    fn rewrite(&self, block: Block, ctx: &PassContext) -> Result<Block, OptimizeError> {
        let mut block = GraphMutator::from_block(block);
        Self::convert_captured_values_to_constants(&mut block, ctx);

        let mut folded_inputs = Vec::new();
        for op_id in block.block().op_order().to_vec() {
            let values = match block.block().eval_op(op_id, ctx.target()) {
                Ok(Some(values)) => values,
                Ok(None) => continue,
                Err(err) => {
                    ctx.diagnostics().warn(
                        block.block(),
                        op_id,
                        format_args!("constant folding failed: {}", err),
                    );
                    continue;
                }
            };

            let Some(op) = block.block().node(op_id).and_then(|n| n.as_operator()) else {
                continue;
            };
            let output_ids = op.output_ids().to_vec();
            let input_ids: Vec<NodeId> = op.input_ids().collect();

            // Only fold if the computed values agree with the inferred types.
            let types_match = output_ids.iter().zip(&values).all(|(id, value)| {
                block.block().value_type(*id) == Some(value.tensor_type())
            });
            if !types_match {
                ctx.diagnostics().warn(
                    block.block(),
                    op_id,
                    format_args!("not folding: computed value has a different type"),
                );
                continue;
            }

            ctx.diagnostics()
                .info(block.block(), op_id, format_args!("folded to a constant"));
            block.remove_op(op_id);
            for (output_id, value) in output_ids.into_iter().zip(values) {
                block.convert_to_constant(output_id, value);
            }
            folded_inputs.extend(input_ids);
        }

        // Constants which were only used by folded operations.
        block.remove_dead(folded_inputs);

        Ok(block.into_block())
    }
}

#[cfg(test)]
mod tests {
    use super::ConstantFolding;
    use crate::graph::builder::Expr;
    use crate::optimize::tests::run_pass;
    use crate::types::{DataType, TensorType};
    use crate::value::Tensor;

    #[test]
    fn test_fold_constant_add() {
        let expr = Expr::constant(5i32).binary("add", Expr::constant(3i32));
        let block = expr.build_block(&[]);
        assert_eq!(block.num_ops(), 1);

        let block = run_pass(ConstantFolding {}, block);
        assert_eq!(block.num_ops(), 0);
        assert_eq!(block.constants().count(), 1);
        let output = block.output_ids()[0];
        assert_eq!(block.constant(output), Some(&Tensor::from(8i32)));
        assert_eq!(block.output_names(), &["add_2".to_string()]);
    }

    #[test]
    fn test_fold_stops_at_runtime_values() {
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[2]));
        let scale = Expr::constant(2.0f32) * 3.0f32;
        let block = (x.clone() * scale).build_block(&[x]);
        assert_eq!(block.num_ops(), 2);

        let block = run_pass(ConstantFolding {}, block);
        let counts = block.op_counts();
        assert_eq!(counts.get("mul"), Some(&1));
        assert_eq!(counts.get("const"), Some(&1));
        let (_, c) = block.constants().next().unwrap();
        assert_eq!(c.value(), &Tensor::from(6.0f32));
    }

    #[test]
    fn test_fold_is_idempotent() {
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[2]));
        let c = (Expr::constant(4.0f32).unary("sqrt") + 1.0f32).unary("relu");
        let block = (x.clone() + c).build_block(&[x]);

        let once = run_pass(ConstantFolding {}, block);
        let twice = run_pass(ConstantFolding {}, once.clone());
        assert_eq!(once.to_string(), twice.to_string());
        assert_eq!(once.num_ops(), 1);
    }
}
