use crate::operator::{
    check_numeric, AttrSpec, InferContext, InferError, InputSpec, OpSignature, Operator,
    ValueInference,
};
use crate::ops::resolve_axes;
use crate::types::{Dimension, TensorType};
use crate::value::{AttrKind, Reduction, Tensor};

static REDUCE_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x")],
    &[
        AttrSpec::optional("axes", AttrKind::Ints),
        AttrSpec::optional("keep_dims", AttrKind::Bool),
    ],
);

/// Return the resolved reduction axes. If the `axes` attribute is not
/// given, all axes are reduced.
fn reduction_axes(ctx: &InferContext, rank: usize) -> Result<Vec<usize>, InferError> {
    match ctx.attr_ints("axes") {
        Some(axes) => Ok(resolve_axes(rank, axes)?.to_vec()),
        None => Ok((0..rank).collect()),
    }
}

fn infer_reduce(ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
    let x = ctx.input_type("x")?;
    check_numeric("x", x)?;
    let axes = reduction_axes(ctx, x.rank())?;
    let keep_dims = ctx.attr_bool("keep_dims", false);

    let shape: Vec<Dimension> = x
        .shape()
        .iter()
        .enumerate()
        .filter_map(|(i, dim)| match (axes.contains(&i), keep_dims) {
            (false, _) => Some(dim.clone()),
            (true, true) => Some(Dimension::Fixed(1)),
            (true, false) => None,
        })
        .collect();
    Ok(vec![TensorType::new(x.dtype(), shape)])
}

macro_rules! reduce_op {
    ($op:ident, $name:literal, $kind:expr) => {
        #[derive(Debug, Default)]
        pub struct $op {}

        impl Operator for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> &'static OpSignature {
                &REDUCE_SIGNATURE
            }

            fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
                infer_reduce(ctx)
            }

            fn value_inference(&self) -> Option<&dyn ValueInference> {
                Some(self)
            }
        }

        impl ValueInference for $op {
            fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
                let Some(x) = ctx.const_value("x") else {
                    return Ok(None);
                };
                let axes = reduction_axes(ctx, x.ndim())?;
                let keep_dims = ctx.attr_bool("keep_dims", false);
                Ok(x.reduce(&axes, keep_dims, $kind).map(|out| vec![out]))
            }
        }
    };
}

reduce_op!(ReduceSum, "reduce_sum", Reduction::Sum);
reduce_op!(ReduceMean, "reduce_mean", Reduction::Mean);
reduce_op!(ReduceMax, "reduce_max", Reduction::Max);
