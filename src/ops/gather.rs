use crate::operator::{
    AttrSpec, InferContext, InferError, InputSpec, OpSignature, Operator, ValueInference,
};
use crate::ops::resolve_single_axis;
use crate::types::TensorType;
use crate::value::{AttrKind, Tensor};

/// Select slices of `x` along `axis` using integer `indices`.
///
/// The output shape is `x.shape[..axis] + indices.shape + x.shape[axis + 1..]`.
/// Negative indices count from the end of the axis.
#[derive(Debug, Default)]
pub struct Gather {}

static GATHER_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x"), InputSpec::new("indices")],
    &[AttrSpec::optional("axis", AttrKind::Int)],
);

/// Resolve `indices` against an axis of size `size`.
fn resolve_indices(indices: &[i64], size: usize) -> Result<Vec<usize>, InferError> {
    indices
        .iter()
        .map(|&index| {
            let resolved = if index < 0 { index + size as i64 } else { index };
            if resolved < 0 || resolved >= size as i64 {
                Err(InferError::IndexOutOfBounds { index, size })
            } else {
                Ok(resolved as usize)
            }
        })
        .collect()
}

impl Operator for Gather {
    fn name(&self) -> &'static str {
        "gather"
    }

    fn signature(&self) -> &'static OpSignature {
        &GATHER_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        let indices = ctx.input_type("indices")?;
        if !indices.dtype().is_int() {
            return Err(InferError::UnsupportedType {
                param: "indices",
                dtype: indices.dtype(),
            });
        }
        let axis = resolve_single_axis(x.rank(), ctx.attr_int("axis", 0))?;

        if let (Some(size), Some(values)) = (
            x.shape()[axis].as_fixed(),
            ctx.const_value("indices").and_then(|t| t.to_i64_vec()),
        ) {
            resolve_indices(&values, size)?;
        }

        let mut shape = x.shape()[..axis].to_vec();
        shape.extend_from_slice(indices.shape());
        shape.extend_from_slice(&x.shape()[axis + 1..]);
        Ok(vec![TensorType::new(x.dtype(), shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Gather {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let (Some(x), Some(indices)) = (ctx.const_value("x"), ctx.const_value("indices")) else {
            return Ok(None);
        };
        let Some(index_values) = indices.to_i64_vec() else {
            return Ok(None);
        };
        let axis = resolve_single_axis(x.ndim(), ctx.attr_int("axis", 0))?;
        let resolved = resolve_indices(&index_values, x.shape()[axis])?;
        Ok(x
            .gather(axis, &resolved, indices.shape())
            .map(|out| vec![out]))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::Gather;
    use crate::operator::{InferContext, InferError, InferInput, Operator};
    use crate::target::TargetVersion;
    use crate::types::{DataType, TensorType};
    use crate::value::{Attr, Tensor};

    fn infer_gather(
        x: &TensorType,
        indices: &TensorType,
        index_values: Option<&Tensor>,
        axis: i64,
    ) -> Result<Vec<TensorType>, InferError> {
        let inputs = [
            InferInput {
                param: "x",
                ty: x,
                value: None,
            },
            InferInput {
                param: "indices",
                ty: indices,
                value: index_values,
            },
        ];
        let mut attrs = BTreeMap::new();
        attrs.insert("axis", Attr::Int(axis));
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        Gather {}.infer(&ctx)
    }

    #[test]
    fn test_gather_infer() {
        let x = TensorType::new(DataType::Float32, dims![10, "seq", 4]);
        let indices = TensorType::new(DataType::Int32, dims![2, 3]);
        assert_eq!(
            infer_gather(&x, &indices, None, 1),
            Ok(vec![TensorType::new(DataType::Float32, dims![10, 2, 3, 4])])
        );
    }

    #[test]
    fn test_gather_rejects_float_indices() {
        let x = TensorType::new(DataType::Float32, dims![10]);
        let indices = TensorType::new(DataType::Float32, dims![2]);
        assert_eq!(
            infer_gather(&x, &indices, None, 0),
            Err(InferError::UnsupportedType {
                param: "indices",
                dtype: DataType::Float32
            })
        );
    }

    #[test]
    fn test_gather_const_indices_out_of_bounds() {
        let x = TensorType::new(DataType::Float32, dims![10]);
        let index_values = Tensor::from_vec(&[2], vec![3i32, 10]).unwrap();
        let indices = index_values.tensor_type();
        assert_eq!(
            infer_gather(&x, &indices, Some(&index_values), 0),
            Err(InferError::IndexOutOfBounds {
                index: 10,
                size: 10
            })
        );

        let negative = Tensor::from_vec(&[1], vec![-10i32]).unwrap();
        assert!(infer_gather(&x, &indices, Some(&negative), 0).is_ok());
    }

    #[test]
    fn test_gather_eval() {
        let x = Tensor::from_vec(&[3], vec![1.0f32, 2., 3.]).unwrap();
        let indices = Tensor::from_vec(&[2], vec![-1i64, 0]).unwrap();
        let types = [x.tensor_type(), indices.tensor_type()];
        let inputs = [
            InferInput {
                param: "x",
                ty: &types[0],
                value: Some(&x),
            },
            InferInput {
                param: "indices",
                ty: &types[1],
                value: Some(&indices),
            },
        ];
        let attrs = BTreeMap::new();
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        let result = Gather {}.value_inference().unwrap().eval(&ctx).unwrap();
        assert_eq!(
            result,
            Some(vec![Tensor::from_vec(&[2], vec![3.0f32, 1.]).unwrap()])
        );
    }
}
