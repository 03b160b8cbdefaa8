//! Control flow ops. These own nested blocks whose interfaces are passed to
//! inference through [`InferContext::blocks`].

use crate::operator::{
    BlockInterface, InferContext, InferError, InputSpec, OpSignature, Operator,
};
use crate::types::{DataType, Dimension, TensorType};

/// Join the output types of two branches. Dimensions which differ between
/// the branches become symbolic.
fn join_types(a: &TensorType, b: &TensorType, name: &str) -> TensorType {
    let shape: Vec<Dimension> = a
        .shape()
        .iter()
        .zip(b.shape())
        .enumerate()
        .map(|(i, (a_dim, b_dim))| match (a_dim, b_dim) {
            (a_dim, b_dim) if a_dim == b_dim => a_dim.clone(),
            (Dimension::Symbolic(_), _) => a_dim.clone(),
            (_, Dimension::Symbolic(_)) => b_dim.clone(),
            _ => Dimension::Symbolic(format!("{}_d{}", name, i)),
        })
        .collect();
    TensorType::new(a.dtype(), shape)
}

fn check_block_count<'a>(ctx: &InferContext<'a>, expected: usize) -> Result<&'a [BlockInterface], InferError> {
    let blocks = ctx.blocks();
    if blocks.len() != expected {
        return Err(InferError::BlockMismatch(format!(
            "expected {} blocks but got {}",
            expected,
            blocks.len()
        )));
    }
    Ok(blocks)
}

/// Conditional. Runs the first block if `pred` is true and the second
/// otherwise.
///
/// Neither block takes inputs. Values from the enclosing scope are captured
/// by name. Both blocks must produce the same number of outputs with the
/// same element types and ranks.
#[derive(Debug, Default)]
pub struct Cond {}

static COND_SIGNATURE: OpSignature =
    OpSignature::new(&[InputSpec::new("pred")], &[]).with_blocks(2);

impl Operator for Cond {
    fn name(&self) -> &'static str {
        "cond"
    }

    fn signature(&self) -> &'static OpSignature {
        &COND_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let pred = ctx.input_type("pred")?;
        if pred.dtype() != DataType::Bool {
            return Err(InferError::UnsupportedType {
                param: "pred",
                dtype: pred.dtype(),
            });
        }
        if !pred.is_scalar() {
            return Err(InferError::IncorrectRank {
                param: "pred",
                rank: pred.rank(),
            });
        }

        let blocks = check_block_count(ctx, 2)?;
        let (then_block, else_block) = (&blocks[0], &blocks[1]);
        if !then_block.inputs.is_empty() || !else_block.inputs.is_empty() {
            return Err(InferError::BlockMismatch(
                "cond branches cannot have inputs".to_string(),
            ));
        }
        if then_block.outputs.len() != else_block.outputs.len() {
            return Err(InferError::BlockMismatch(format!(
                "cond branches have {} and {} outputs",
                then_block.outputs.len(),
                else_block.outputs.len()
            )));
        }

        then_block
            .outputs
            .iter()
            .zip(&else_block.outputs)
            .enumerate()
            .map(|(i, (a, b))| {
                if a.dtype() != b.dtype() || a.rank() != b.rank() {
                    return Err(InferError::BlockMismatch(format!(
                        "cond output {} has type {} in one branch and {} in the other",
                        i, a, b
                    )));
                }
                Ok(join_types(a, b, &format!("cond_out{}", i)))
            })
            .collect()
    }
}

/// Loop. Runs the body block while the condition block returns true.
///
/// Both blocks take the current loop variables as inputs. The condition
/// block returns a bool scalar and the body block returns the next loop
/// variables, which must be compatible with the initial values.
#[derive(Debug, Default)]
pub struct WhileLoop {}

static WHILE_LOOP_SIGNATURE: OpSignature =
    OpSignature::new(&[InputSpec::new("loop_vars").variadic()], &[]).with_blocks(2);

impl Operator for WhileLoop {
    fn name(&self) -> &'static str {
        "while_loop"
    }

    fn signature(&self) -> &'static OpSignature {
        &WHILE_LOOP_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let vars: Vec<TensorType> = ctx
            .variadic("loop_vars")
            .iter()
            .map(|input| input.ty.clone())
            .collect();
        if vars.is_empty() {
            return Err(InferError::MissingInput("loop_vars"));
        }

        let blocks = check_block_count(ctx, 2)?;
        let (cond_block, body_block) = (&blocks[0], &blocks[1]);

        for (role, block) in [("condition", cond_block), ("body", body_block)] {
            let inputs_match = block.inputs.len() == vars.len()
                && block.inputs.iter().zip(&vars).all(|(a, b)| a.is_compatible(b));
            if !inputs_match {
                return Err(InferError::BlockMismatch(format!(
                    "loop {} inputs do not match the loop variables",
                    role
                )));
            }
        }

        match &cond_block.outputs[..] {
            [out] if out.dtype() == DataType::Bool && out.is_scalar() => {}
            _ => {
                return Err(InferError::BlockMismatch(
                    "loop condition must return a single bool scalar".to_string(),
                ))
            }
        }

        let outputs_match = body_block.outputs.len() == vars.len()
            && body_block
                .outputs
                .iter()
                .zip(&vars)
                .all(|(a, b)| a.is_compatible(b));
        if !outputs_match {
            return Err(InferError::BlockMismatch(
                "loop body outputs do not match the loop variables".to_string(),
            ));
        }

        Ok(vars)
    }
}
