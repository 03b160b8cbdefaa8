use crate::operator::{
    AttrSpec, InferContext, InferError, InputSpec, OpSignature, Operator, ValueInference,
};
use crate::ops::resolve_axes;
use crate::types::{Dimension, TensorType};
use crate::value::{AttrKind, Tensor};

static UNARY_SIGNATURE: OpSignature = OpSignature::new(&[InputSpec::new("x")], &[]);

/// Evaluate an op which only changes the shape of its input, by reshaping
/// the input to the inferred output shape.
fn eval_as_reshape(op: &dyn Operator, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
    let Some(x) = ctx.const_value("x") else {
        return Ok(None);
    };
    let out_types = op.infer(ctx)?;
    let Some(shape) = out_types.first().and_then(|ty| ty.fixed_shape()) else {
        return Ok(None);
    };
    Ok(x.reshape(&shape).map(|out| vec![out]))
}

/// Returns its input unchanged.
#[derive(Debug, Default)]
pub struct Identity {}

impl Operator for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn signature(&self) -> &'static OpSignature {
        &UNARY_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        Ok(vec![ctx.input_type("x")?.clone()])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Identity {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        Ok(ctx.const_value("x").map(|x| vec![x.clone()]))
    }
}

/// Return true if `perm` contains each value in `0..perm.len()` once.
pub(crate) fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &p in perm {
        if p >= perm.len() || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}

/// Permute the dimensions of a tensor. Output dimension `i` is input
/// dimension `perm[i]`.
#[derive(Debug, Default)]
pub struct Transpose {}

static TRANSPOSE_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x")],
    &[AttrSpec::required("perm", AttrKind::Ints)],
);

impl Transpose {
    fn perm(ctx: &InferContext, rank: usize) -> Result<Vec<usize>, InferError> {
        let perm = ctx.attr_ints("perm").unwrap_or_default();
        if perm.len() != rank {
            return Err(InferError::ShapeMismatch(format!(
                "perm {:?} has wrong length for rank {}",
                perm, rank
            )));
        }
        let resolved = resolve_axes(rank, perm)?.to_vec();
        if !is_permutation(&resolved) {
            return Err(InferError::InvalidValue(format!(
                "{:?} is not a permutation",
                perm
            )));
        }
        Ok(resolved)
    }
}

impl Operator for Transpose {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn signature(&self) -> &'static OpSignature {
        &TRANSPOSE_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        let perm = Self::perm(ctx, x.rank())?;
        let shape: Vec<Dimension> = perm.iter().map(|&p| x.shape()[p].clone()).collect();
        Ok(vec![TensorType::new(x.dtype(), shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Transpose {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let Some(x) = ctx.const_value("x") else {
            return Ok(None);
        };
        let perm = Self::perm(ctx, x.ndim())?;
        Ok(Some(vec![x.permute(&perm)]))
    }
}

/// Change the shape of a tensor while keeping elements in row-major order.
///
/// At most one entry of the `shape` attribute may be -1, meaning the size
/// is inferred from the element count.
#[derive(Debug, Default)]
pub struct Reshape {}

static RESHAPE_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x")],
    &[AttrSpec::required("shape", AttrKind::Ints)],
);

impl Operator for Reshape {
    fn name(&self) -> &'static str {
        "reshape"
    }

    fn signature(&self) -> &'static OpSignature {
        &RESHAPE_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        let target = ctx.attr_ints("shape").unwrap_or_default();

        let mut inferred_axis = None;
        for (i, &size) in target.iter().enumerate() {
            match size {
                -1 if inferred_axis.is_none() => inferred_axis = Some(i),
                -1 => {
                    return Err(InferError::InvalidValue(
                        "reshape allows at most one -1 in shape".to_string(),
                    ))
                }
                size if size < 0 => {
                    return Err(InferError::InvalidValue(format!(
                        "invalid reshape size {}",
                        size
                    )))
                }
                _ => {}
            }
        }

        let known: usize = target
            .iter()
            .filter(|&&size| size >= 0)
            .map(|&size| size as usize)
            .product();
        let mut shape: Vec<Dimension> = target
            .iter()
            .map(|&size| Dimension::Fixed(size.max(0) as usize))
            .collect();

        match x.num_elements() {
            Some(count) => {
                if let Some(axis) = inferred_axis {
                    if known == 0 || count % known != 0 {
                        return Err(InferError::ShapeMismatch(format!(
                            "cannot reshape {} elements to {:?}",
                            count, target
                        )));
                    }
                    shape[axis] = Dimension::Fixed(count / known);
                } else if count != known {
                    return Err(InferError::ShapeMismatch(format!(
                        "cannot reshape {} elements to {:?}",
                        count, target
                    )));
                }
            }
            None => {
                if let Some(axis) = inferred_axis {
                    // With one symbolic input dimension and matching fixed
                    // sizes, the inferred size is that symbol.
                    let symbols: Vec<&Dimension> =
                        x.shape().iter().filter(|d| d.is_symbolic()).collect();
                    let fixed: usize = x.shape().iter().filter_map(|d| d.as_fixed()).product();
                    shape[axis] = match symbols[..] {
                        [sym] if fixed == known => sym.clone(),
                        _ => Dimension::Symbolic(format!("{}_reshaped", symbols[0])),
                    };
                }
            }
        }

        Ok(vec![TensorType::new(x.dtype(), shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Reshape {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        eval_as_reshape(self, ctx)
    }
}

/// Insert size-1 dimensions at the positions given by `axes`, which index
/// the output shape.
#[derive(Debug, Default)]
pub struct ExpandDims {}

static EXPAND_DIMS_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x")],
    &[AttrSpec::required("axes", AttrKind::Ints)],
);

impl Operator for ExpandDims {
    fn name(&self) -> &'static str {
        "expand_dims"
    }

    fn signature(&self) -> &'static OpSignature {
        &EXPAND_DIMS_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        let axes = ctx.attr_ints("axes").unwrap_or_default();
        let out_rank = x.rank() + axes.len();
        let mut axes = resolve_axes(out_rank, axes)?;
        axes.sort_unstable();

        let mut shape = x.shape().to_vec();
        for axis in axes {
            shape.insert(axis, Dimension::Fixed(1));
        }
        Ok(vec![TensorType::new(x.dtype(), shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for ExpandDims {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        eval_as_reshape(self, ctx)
    }
}

/// Remove size-1 dimensions. If `axes` is not given, all size-1 dimensions
/// are removed.
#[derive(Debug, Default)]
pub struct Squeeze {}

static SQUEEZE_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x")],
    &[AttrSpec::optional("axes", AttrKind::Ints)],
);

impl Operator for Squeeze {
    fn name(&self) -> &'static str {
        "squeeze"
    }

    fn signature(&self) -> &'static OpSignature {
        &SQUEEZE_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        let shape: Vec<Dimension> = match ctx.attr_ints("axes") {
            Some(axes) => {
                let axes = resolve_axes(x.rank(), axes)?;
                for &axis in &axes {
                    if x.shape()[axis] != Dimension::Fixed(1) {
                        return Err(InferError::ShapeMismatch(format!(
                            "cannot squeeze dimension {} of size {}",
                            axis,
                            x.shape()[axis]
                        )));
                    }
                }
                x.shape()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, d)| d.clone())
                    .collect()
            }
            None => x
                .shape()
                .iter()
                .filter(|d| **d != Dimension::Fixed(1))
                .cloned()
                .collect(),
        };
        Ok(vec![TensorType::new(x.dtype(), shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Squeeze {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        eval_as_reshape(self, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use milc_testing::TestCases;

    use super::{is_permutation, ExpandDims, Reshape, Squeeze, Transpose};
    use crate::operator::{InferContext, InferErrorKind, InferInput, Operator};
    use crate::target::TargetVersion;
    use crate::types::{DataType, Dimension, TensorType};
    use crate::value::{Attr, Tensor};

    #[derive(Debug)]
    struct Case {
        op: &'static str,
        input: Vec<Dimension>,
        attr: (&'static str, Vec<i64>),
        expected: Result<Vec<Dimension>, InferErrorKind>,
    }

    fn infer(op: &str, x: &TensorType, attr: &(&'static str, Vec<i64>)) -> Result<TensorType, InferErrorKind> {
        let inputs = [InferInput {
            param: "x",
            ty: x,
            value: None,
        }];
        let mut attrs = BTreeMap::new();
        attrs.insert(attr.0, Attr::Ints(attr.1.clone()));
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        let result = match op {
            "transpose" => Transpose {}.infer(&ctx),
            "reshape" => Reshape {}.infer(&ctx),
            "expand_dims" => ExpandDims {}.infer(&ctx),
            "squeeze" => Squeeze {}.infer(&ctx),
            _ => panic!("unknown op {}", op),
        };
        result.map(|mut types| types.remove(0)).map_err(|err| err.kind())
    }

    #[test]
    fn test_layout_infer() {
        let cases = [
            Case {
                op: "transpose",
                input: dims!["batch", 3, 4],
                attr: ("perm", vec![2, 0, 1]),
                expected: Ok(dims![4, "batch", 3]),
            },
            Case {
                op: "transpose",
                input: dims![2, 3],
                attr: ("perm", vec![0, 0]),
                expected: Err(InferErrorKind::Shape),
            },
            Case {
                op: "reshape",
                input: dims![2, 3, 4],
                attr: ("shape", vec![6, -1]),
                expected: Ok(dims![6, 4]),
            },
            Case {
                op: "reshape",
                input: dims!["batch", 3, 4],
                attr: ("shape", vec![-1, 12]),
                expected: Ok(dims!["batch", 12]),
            },
            Case {
                op: "reshape",
                input: dims![2, 3],
                attr: ("shape", vec![4]),
                expected: Err(InferErrorKind::Shape),
            },
            Case {
                op: "expand_dims",
                input: dims![2, 3],
                attr: ("axes", vec![0, -1]),
                expected: Ok(dims![1, 2, 3, 1]),
            },
            Case {
                op: "squeeze",
                input: dims![1, 3, 1],
                attr: ("axes", vec![-1]),
                expected: Ok(dims![1, 3]),
            },
            Case {
                op: "squeeze",
                input: dims![1, 3, 1],
                attr: ("axes", vec![1]),
                expected: Err(InferErrorKind::Shape),
            },
        ];

        cases.test_each(|case| {
            let x = TensorType::new(DataType::Float32, case.input.clone());
            let result = infer(case.op, &x, &case.attr).map(|ty| ty.shape().to_vec());
            assert_eq!(result, case.expected);
        })
    }

    #[test]
    fn test_is_permutation() {
        assert!(is_permutation(&[2, 0, 1]));
        assert!(is_permutation(&[]));
        assert!(!is_permutation(&[0, 2]));
        assert!(!is_permutation(&[1, 1]));
    }

    #[test]
    fn test_squeeze_eval() {
        let x = Tensor::from_vec(&[1, 2, 1], vec![1i32, 2]).unwrap();
        let ty = x.tensor_type();
        let inputs = [InferInput {
            param: "x",
            ty: &ty,
            value: Some(&x),
        }];
        let attrs = BTreeMap::new();
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        let result = Squeeze {}.value_inference().unwrap().eval(&ctx).unwrap();
        assert_eq!(result, Some(vec![Tensor::from_vec(&[2], vec![1i32, 2]).unwrap()]));
    }
}
