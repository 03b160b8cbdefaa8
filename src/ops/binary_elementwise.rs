use crate::operator::{
    check_float, check_numeric, InferContext, InferError, InputSpec, OpSignature, Operator,
    ValueInference,
};
use crate::types::{broadcast_shapes, DataType, TensorType};
use crate::value::Tensor;

static BINARY_SIGNATURE: OpSignature =
    OpSignature::new(&[InputSpec::new("x"), InputSpec::new("y")], &[]);

/// Infer the output type of a broadcasting binary op.
///
/// Both inputs must have the same numeric element type. The output has
/// element type `out_dtype` if given, or the input type otherwise.
fn infer_binary(
    ctx: &InferContext,
    float_only: bool,
    out_dtype: Option<DataType>,
) -> Result<Vec<TensorType>, InferError> {
    let x = ctx.input_type("x")?;
    let y = ctx.input_type("y")?;
    if x.dtype() != y.dtype() {
        return Err(InferError::DTypeMismatch {
            lhs: x.dtype(),
            rhs: y.dtype(),
        });
    }
    if float_only {
        check_float("x", x)?;
    } else {
        check_numeric("x", x)?;
    }
    let shape = broadcast_shapes(x.shape(), y.shape())
        .map_err(|err| InferError::broadcast(err, x.shape(), y.shape()))?;
    Ok(vec![TensorType::new(out_dtype.unwrap_or(x.dtype()), shape)])
}

fn const_inputs<'a>(ctx: &InferContext<'a>) -> Option<(&'a Tensor, &'a Tensor)> {
    Some((ctx.const_value("x")?, ctx.const_value("y")?))
}

/// Define an arithmetic op.
///
/// Value inference computes float results with `$f_float` and integer
/// results with `$f_int`, which returns None for undefined results.
macro_rules! arith_op {
    ($op:ident, $name:literal, $commutative:expr, $float_only:expr, $f_float:expr, $f_int:expr) => {
        #[derive(Debug, Default)]
        pub struct $op {}

        impl Operator for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> &'static OpSignature {
                &BINARY_SIGNATURE
            }

            fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
                infer_binary(ctx, $float_only, None)
            }

            fn value_inference(&self) -> Option<&dyn ValueInference> {
                Some(self)
            }

            fn is_commutative(&self) -> bool {
                $commutative
            }
        }

        impl ValueInference for $op {
            fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
                let Some((x, y)) = const_inputs(ctx) else {
                    return Ok(None);
                };
                Ok(x.zip_numeric(y, $f_float, $f_int).map(|out| vec![out]))
            }
        }
    };
}

arith_op!(Add, "add", true, false, |x, y| x + y, |x: i128, y| x.checked_add(y));
arith_op!(Sub, "sub", false, false, |x, y| x - y, |x: i128, y| x.checked_sub(y));
arith_op!(Mul, "mul", true, false, |x, y| x * y, |x: i128, y| x.checked_mul(y));
arith_op!(RealDiv, "real_div", false, true, |x, y| x / y, |_, _| None);
arith_op!(
    Pow,
    "pow",
    false,
    false,
    |x: f64, y| x.powf(y),
    |x: i128, y| u32::try_from(y).ok().and_then(|y| x.checked_pow(y))
);
arith_op!(Maximum, "maximum", true, false, f64::max, |x: i128, y| Some(x.max(y)));
arith_op!(Minimum, "minimum", true, false, f64::min, |x: i128, y| Some(x.min(y)));

/// Define a comparison op which produces a bool tensor.
macro_rules! compare_op {
    ($op:ident, $name:literal, $commutative:expr, $cmp:expr) => {
        #[derive(Debug, Default)]
        pub struct $op {}

        impl Operator for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> &'static OpSignature {
                &BINARY_SIGNATURE
            }

            fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
                infer_binary(ctx, false, Some(DataType::Bool))
            }

            fn value_inference(&self) -> Option<&dyn ValueInference> {
                Some(self)
            }

            fn is_commutative(&self) -> bool {
                $commutative
            }
        }

        impl ValueInference for $op {
            fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
                let Some((x, y)) = const_inputs(ctx) else {
                    return Ok(None);
                };
                Ok(x.compare(y, $cmp).map(|out| vec![out]))
            }
        }
    };
}

compare_op!(Equal, "equal", true, |x, y| x == y);
compare_op!(Less, "less", false, |x, y| x < y);
compare_op!(Greater, "greater", false, |x, y| x > y);

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use milc_testing::TestCases;

    use super::{Add, Less, Pow, RealDiv};
    use crate::operator::{InferContext, InferError, InferErrorKind, InferInput, Operator};
    use crate::target::TargetVersion;
    use crate::types::{DataType, Dimension, TensorType};
    use crate::value::Tensor;

    fn infer(op: &dyn Operator, x: &TensorType, y: &TensorType) -> Result<TensorType, InferError> {
        let inputs = [
            InferInput {
                param: "x",
                ty: x,
                value: None,
            },
            InferInput {
                param: "y",
                ty: y,
                value: None,
            },
        ];
        let attrs = BTreeMap::new();
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        op.infer(&ctx).map(|mut types| types.remove(0))
    }

    fn eval(op: &dyn Operator, x: &Tensor, y: &Tensor) -> Option<Tensor> {
        let (x_ty, y_ty) = (x.tensor_type(), y.tensor_type());
        let inputs = [
            InferInput {
                param: "x",
                ty: &x_ty,
                value: Some(x),
            },
            InferInput {
                param: "y",
                ty: &y_ty,
                value: Some(y),
            },
        ];
        let attrs = BTreeMap::new();
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        op.value_inference()?.eval(&ctx).unwrap().map(|mut out| out.remove(0))
    }

    #[test]
    fn test_add_infer() {
        let int3 = TensorType::new(DataType::Int32, dims![3]);
        assert_eq!(infer(&Add {}, &int3, &int3), Ok(int3.clone()));

        let int4 = TensorType::new(DataType::Int32, dims![4]);
        let err = infer(&Add {}, &int3, &int4).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::Shape);
        assert_eq!(
            err,
            InferError::IncompatibleShapes {
                dim: 0,
                lhs: Dimension::Fixed(3),
                rhs: Dimension::Fixed(4),
                lhs_shape: dims![3],
                rhs_shape: dims![4],
            }
        );
    }

    #[test]
    fn test_binary_infer() {
        #[derive(Debug)]
        struct Case {
            x: TensorType,
            y: TensorType,
            expected: Result<TensorType, InferErrorKind>,
        }

        let cases = [
            Case {
                x: TensorType::new(DataType::Float32, dims!["batch", 1, 8]),
                y: TensorType::new(DataType::Float32, dims![4, 1]),
                expected: Ok(TensorType::new(DataType::Float32, dims!["batch", 4, 8])),
            },
            Case {
                x: TensorType::new(DataType::Float32, dims![2]),
                y: TensorType::new(DataType::Float16, dims![2]),
                expected: Err(InferErrorKind::Type),
            },
            Case {
                x: TensorType::new(DataType::Bool, dims![2]),
                y: TensorType::new(DataType::Bool, dims![2]),
                expected: Err(InferErrorKind::Type),
            },
        ];

        cases.test_each(|case| {
            let result = infer(&Add {}, &case.x, &case.y).map_err(|err| err.kind());
            assert_eq!(result, case.expected);
        });
    }

    #[test]
    fn test_real_div_requires_float() {
        let int = TensorType::scalar(DataType::Int32);
        let err = infer(&RealDiv {}, &int, &int).err().unwrap();
        assert!(matches!(err, InferError::UnsupportedType { param: "x", .. }));
    }

    #[test]
    fn test_compare_infer() {
        let x = TensorType::new(DataType::Float32, dims![2, 3]);
        let y = TensorType::scalar(DataType::Float32);
        let out = infer(&Less {}, &x, &y).unwrap();
        assert_eq!(out, TensorType::new(DataType::Bool, dims![2, 3]));
    }

    #[test]
    fn test_binary_eval() {
        assert_eq!(
            eval(&Add {}, &Tensor::from(5i32), &Tensor::from(3i32)),
            Some(Tensor::from(8i32))
        );
        assert_eq!(
            eval(&Pow {}, &Tensor::from(2.0f32), &Tensor::from(3.0f32)),
            Some(Tensor::from(8.0f32))
        );
        assert_eq!(
            eval(&Less {}, &Tensor::from(2i32), &Tensor::from(3i32)),
            Some(Tensor::from(true))
        );
        // Negative integer exponents are not folded.
        assert_eq!(eval(&Pow {}, &Tensor::from(2i32), &Tensor::from(-1i32)), None);
    }
}
