use crate::operator::{
    AttrSpec, InferContext, InferError, InputSpec, OpSignature, Operator, ValueInference,
};
use crate::ops::resolve_single_axis;
use crate::types::{Dimension, TensorType};
use crate::value::{AttrKind, Tensor};

/// Join a list of tensors along an existing axis.
#[derive(Debug, Default)]
pub struct Concat {}

static CONCAT_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("values").variadic()],
    &[AttrSpec::required("axis", AttrKind::Int)],
);

/// Join two dimensions which must have the same size, preferring the fixed
/// one.
fn join_dim(a: &Dimension, b: &Dimension) -> Option<Dimension> {
    match (a, b) {
        (a, b) if a == b => Some(a.clone()),
        (Dimension::Fixed(_), Dimension::Symbolic(_)) => Some(a.clone()),
        (Dimension::Symbolic(_), _) => Some(b.clone()),
        _ => None,
    }
}

impl Operator for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn signature(&self) -> &'static OpSignature {
        &CONCAT_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let values = ctx.variadic("values");
        let Some(first) = values.first() else {
            return Err(InferError::MissingInput("values"));
        };
        let rank = first.ty.rank();
        let axis = resolve_single_axis(rank, ctx.attr_int("axis", 0))?;

        let mut shape = first.ty.shape().to_vec();
        let mut axis_sizes = vec![first.ty.shape()[axis].clone()];

        for value in &values[1..] {
            if value.ty.dtype() != first.ty.dtype() {
                return Err(InferError::DTypeMismatch {
                    lhs: first.ty.dtype(),
                    rhs: value.ty.dtype(),
                });
            }
            if value.ty.rank() != rank {
                return Err(InferError::IncorrectRank {
                    param: "values",
                    rank: value.ty.rank(),
                });
            }
            for (i, dim) in value.ty.shape().iter().enumerate() {
                if i == axis {
                    axis_sizes.push(dim.clone());
                    continue;
                }
                shape[i] = join_dim(&shape[i], dim).ok_or_else(|| {
                    InferError::ShapeMismatch(format!(
                        "concat inputs differ in dimension {} ({} vs {})",
                        i, shape[i], dim
                    ))
                })?;
            }
        }

        shape[axis] = match axis_sizes.iter().map(|d| d.as_fixed()).sum::<Option<usize>>() {
            Some(total) => Dimension::Fixed(total),
            None => axis_sizes
                .into_iter()
                .find(|d| d.is_symbolic())
                .unwrap_or(Dimension::Fixed(0)),
        };

        Ok(vec![TensorType::new(first.ty.dtype(), shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Concat {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let Some(values) = ctx
            .variadic("values")
            .iter()
            .map(|input| input.value)
            .collect::<Option<Vec<&Tensor>>>()
        else {
            return Ok(None);
        };
        let Some(first) = values.first() else {
            return Ok(None);
        };
        let axis = resolve_single_axis(first.ndim(), ctx.attr_int("axis", 0))?;
        Ok(Tensor::concat(&values, axis).map(|out| vec![out]))
    }
}
