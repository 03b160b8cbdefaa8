use std::collections::BTreeMap;

use crate::graph::{Block, NodeId, OpInput, OperatorNode};
use crate::ops::resolve_axes;
use crate::value::Attr;

use super::{BlockPass, GraphMutator, OptimizeError, PassContext};

/// Resolve the `perm` attribute of a transpose of a rank-`rank` value.
fn transpose_perm(op: &OperatorNode, rank: usize) -> Option<Vec<usize>> {
    let perm = op.attr("perm")?.as_ints()?;
    resolve_axes(rank, perm).ok().map(|p| p.to_vec())
}

fn is_identity_perm(perm: &[usize]) -> bool {
    perm.iter().enumerate().all(|(i, p)| i == *p)
}

/// Compose two permutations, `inner` applied first.
///
/// Output dimension `i` of `transpose(transpose(x, inner), outer)` is
/// dimension `inner[outer[i]]` of `x`.
fn compose_perms(inner: &[usize], outer: &[usize]) -> Vec<usize> {
    outer.iter().map(|&p| inner[p]).collect()
}

/// What to do with an operation.
enum Rewrite {
    /// Replace the op's output with an existing value.
    Forward(NodeId),

    /// Replace the op with one which reads `input` and has attributes
    /// `attrs`.
    Rebind {
        input: NodeId,
        attrs: BTreeMap<&'static str, Attr>,
    },
}

/// Remove operations which don't change their input, and collapse chains
/// of layout operations.
///
/// This removes `identity` ops, `cast`s to the input's dtype, `reshape`s
/// which don't change the shape and transposes with an identity
/// permutation. A chain of transposes is replaced by a single transpose
/// with the composed permutation, or removed if that is the identity, and
/// a chain of reshapes is replaced by the last reshape.
pub struct RemoveRedundantOps {}

impl RemoveRedundantOps {
    fn plan(block: &Block, op: &OperatorNode) -> Option<Rewrite> {
        if !op.blocks().is_empty() || op.output_ids().len() != 1 {
            return None;
        }
        let input_id = op.input("x")?;
        let input_ty = block.value_type(input_id)?;
        let output_ty = block.value_type(op.output_ids()[0])?;

        match op.kind() {
            "identity" => Some(Rewrite::Forward(input_id)),
            "cast" if input_ty.dtype() == output_ty.dtype() => Some(Rewrite::Forward(input_id)),
            "reshape" if input_ty == output_ty => Some(Rewrite::Forward(input_id)),
            "reshape" => {
                let inner = block.producer_op(input_id).filter(|p| p.kind() == "reshape")?;
                Some(Rewrite::Rebind {
                    input: inner.input("x")?,
                    attrs: op.attrs().clone(),
                })
            }
            "transpose" => {
                let perm = transpose_perm(op, input_ty.rank())?;
                if is_identity_perm(&perm) {
                    return Some(Rewrite::Forward(input_id));
                }
                let inner = block
                    .producer_op(input_id)
                    .filter(|p| p.kind() == "transpose")?;
                let source = inner.input("x")?;
                let inner_perm = transpose_perm(inner, input_ty.rank())?;
                let composed = compose_perms(&inner_perm, &perm);
                if is_identity_perm(&composed) {
                    Some(Rewrite::Forward(source))
                } else {
                    let mut attrs = op.attrs().clone();
                    attrs.insert(
                        "perm",
                        Attr::Ints(composed.into_iter().map(|p| p as i64).collect()),
                    );
                    Some(Rewrite::Rebind {
                        input: source,
                        attrs,
                    })
                }
            }
            _ => None,
        }
    }
}

impl BlockPass for RemoveRedundantOps {
    fn name(&self) -> &'static str {
        "remove_redundant_ops"
    }

    fn rewrite(&self, block: Block, ctx: &PassContext) -> Result<Block, OptimizeError> {
        let mut block = GraphMutator::from_block(block);
        let mut dead_candidates = Vec::new();

        for op_id in block.block().op_order().to_vec() {
            let Some(op) = block.block().node(op_id).and_then(|n| n.as_operator()) else {
                continue;
            };
            let Some(rewrite) = Self::plan(block.block(), op) else {
                continue;
            };
            let output_id = op.output_ids()[0];
            let old_input = op.input("x");

            match rewrite {
                Rewrite::Forward(source) => {
                    ctx.diagnostics().info(
                        block.block(),
                        op_id,
                        format_args!("forwarded \"{}\"", block.block().node_name(source)),
                    );
                    block.replace_value(output_id, source);
                    block.remove_op(op_id);
                    block.remove_value(output_id);
                }
                Rewrite::Rebind { input, attrs } => {
                    let new_op = OperatorNode::new(
                        op.name(),
                        op.clone_operator(),
                        vec![OpInput { param: "x", id: input }],
                        attrs,
                        vec![output_id],
                        Vec::new(),
                    );

                    // Only rebind if the output type is unchanged.
                    let inferred = block.block().infer_op(
                        new_op.operator(),
                        new_op.inputs(),
                        new_op.attrs(),
                        &[],
                        ctx.target(),
                    );
                    let expected = block.block().value_type(output_id);
                    if inferred.ok().and_then(|types| types.into_iter().next()) != expected {
                        continue;
                    }
                    block.replace_op(op_id, new_op);
                }
            }
            dead_candidates.extend(old_input);
        }

        block.remove_dead(dead_candidates);
        Ok(block.into_block())
    }
}

#[cfg(test)]
mod tests {
    use super::{compose_perms, RemoveRedundantOps};
    use crate::graph::builder::Expr;
    use crate::optimize::tests::run_pass;
    use crate::types::{DataType, TensorType};
    use crate::value::Attr;

    fn transpose(x: &Expr, perm: &[i64]) -> Expr {
        x.apply("transpose", &[], &[("perm", Attr::Ints(perm.to_vec()))])
    }

    #[test]
    fn test_compose_perms() {
        assert_eq!(compose_perms(&[1, 2, 0], &[1, 2, 0]), vec![2, 0, 1]);
        assert_eq!(compose_perms(&[1, 0], &[1, 0]), vec![0, 1]);
    }

    #[test]
    fn test_transpose_chain_to_identity() {
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[2, 3, 4]));
        let t1 = transpose(&x, &[1, 2, 0]);
        let t2 = transpose(&t1, &[1, 2, 0]);
        let t3 = transpose(&t2, &[1, 2, 0]);
        let block = t3.build_block(&[x]);
        assert_eq!(block.num_ops(), 3);
        let output_name = block.output_names()[0].clone();

        let block = run_pass(RemoveRedundantOps {}, block);
        assert_eq!(block.num_ops(), 0);
        assert_eq!(block.output_ids(), block.input_ids());
        assert_eq!(block.output_names(), &[output_name]);
    }

    #[test]
    fn test_transpose_chain_is_composed() {
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[2, 3, 4]));
        let t1 = transpose(&x, &[1, 0, 2]);
        let t2 = transpose(&t1, &[0, 2, 1]);
        let block = t2.build_block(&[x]);

        let block = run_pass(RemoveRedundantOps {}, block);
        assert_eq!(block.num_ops(), 1);
        let (_, op) = block.operators().next().unwrap();
        assert_eq!(op.attr("perm"), Some(&Attr::Ints(vec![1, 2, 0])));
        assert_eq!(op.input("x"), Some(block.input_ids()[0]));
        assert_eq!(
            block.signature().outputs[0].ty,
            TensorType::fixed(DataType::Float32, &[3, 4, 2])
        );
    }

    #[test]
    fn test_remove_noop_ops() {
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[2, 3]));
        let expr = x
            .unary("identity")
            .apply("cast", &[], &[("dtype", "fp32".into())])
            .apply("reshape", &[], &[("shape", vec![2i64, 3].into())])
            .unary("relu");
        let block = expr.build_block(&[x]);
        assert_eq!(block.num_ops(), 4);

        let block = run_pass(RemoveRedundantOps {}, block);
        assert_eq!(block.num_ops(), 1);
        let (_, relu) = block.operators().next().unwrap();
        assert_eq!(relu.input("x"), Some(block.input_ids()[0]));
    }

    #[test]
    fn test_reshape_chain() {
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[2, 3]));
        let expr = x
            .apply("reshape", &[], &[("shape", vec![6i64].into())])
            .apply("reshape", &[], &[("shape", vec![3i64, 2].into())]);
        let block = expr.build_block(&[x]);

        let block = run_pass(RemoveRedundantOps {}, block);
        assert_eq!(block.num_ops(), 1);
        let (_, op) = block.operators().next().unwrap();
        assert_eq!(op.input("x"), Some(block.input_ids()[0]));
        assert_eq!(op.attr("shape"), Some(&Attr::Ints(vec![3, 2])));
    }
}
