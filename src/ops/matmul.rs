use ndarray::{Array1, Ix2};

use crate::operator::{
    check_float, check_numeric, AttrSpec, InferContext, InferError, InputSpec, OpSignature,
    Operator, ValueInference,
};
use crate::types::{broadcast_shapes, Dimension, TensorType};
use crate::value::{AttrKind, Tensor};

/// Return true if two dimensions may have the same size.
fn dims_agree(a: &Dimension, b: &Dimension) -> bool {
    a == b || a.is_symbolic() || b.is_symbolic()
}

/// Batched matrix multiplication with optional transposition of the
/// innermost two dimensions of each input.
///
/// A rank-1 `x` is treated as a row vector and a rank-1 `y` as a column
/// vector, with the corresponding dimension removed from the output.
#[derive(Debug, Default)]
pub struct MatMul {}

static MATMUL_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x"), InputSpec::new("y")],
    &[
        AttrSpec::optional("transpose_x", AttrKind::Bool),
        AttrSpec::optional("transpose_y", AttrKind::Bool),
    ],
);

impl Operator for MatMul {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn signature(&self) -> &'static OpSignature {
        &MATMUL_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        let y = ctx.input_type("y")?;
        if x.dtype() != y.dtype() {
            return Err(InferError::DTypeMismatch {
                lhs: x.dtype(),
                rhs: y.dtype(),
            });
        }
        check_numeric("x", x)?;
        for (param, ty) in [("x", x), ("y", y)] {
            if ty.rank() == 0 {
                return Err(InferError::IncorrectRank { param, rank: 0 });
            }
        }

        let transpose_x = ctx.attr_bool("transpose_x", false);
        let transpose_y = ctx.attr_bool("transpose_y", false);

        let x_vec = x.rank() == 1;
        let y_vec = y.rank() == 1;

        let mut x_shape = x.shape().to_vec();
        if x_vec {
            x_shape.insert(0, Dimension::Fixed(1));
        } else if transpose_x {
            let n = x_shape.len();
            x_shape.swap(n - 2, n - 1);
        }

        let mut y_shape = y.shape().to_vec();
        if y_vec {
            y_shape.push(Dimension::Fixed(1));
        } else if transpose_y {
            let n = y_shape.len();
            y_shape.swap(n - 2, n - 1);
        }

        let (x_batch, x_mat) = x_shape.split_at(x_shape.len() - 2);
        let (y_batch, y_mat) = y_shape.split_at(y_shape.len() - 2);
        if !dims_agree(&x_mat[1], &y_mat[0]) {
            return Err(InferError::InnerDimMismatch {
                lhs: x_mat[1].clone(),
                rhs: y_mat[0].clone(),
                transpose_x,
                transpose_y,
            });
        }

        let mut out_shape = broadcast_shapes(x_batch, y_batch)
            .map_err(|err| InferError::broadcast(err, x_batch, y_batch))?;
        if !x_vec {
            out_shape.push(x_mat[0].clone());
        }
        if !y_vec {
            out_shape.push(y_mat[1].clone());
        }

        Ok(vec![TensorType::new(x.dtype(), out_shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for MatMul {
    /// Evaluate matrix products of rank-2 constants. Other ranks are left
    /// to the runtime.
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let (Some(x), Some(y)) = (ctx.const_value("x"), ctx.const_value("y")) else {
            return Ok(None);
        };
        if x.ndim() != 2 || y.ndim() != 2 {
            return Ok(None);
        }
        let (Some(x_data), Some(y_data)) = (x.to_f64_array(), y.to_f64_array()) else {
            return Ok(None);
        };
        let (Ok(x_mat), Ok(y_mat)) = (
            x_data.into_dimensionality::<Ix2>(),
            y_data.into_dimensionality::<Ix2>(),
        ) else {
            return Ok(None);
        };

        let x_mat = if ctx.attr_bool("transpose_x", false) {
            x_mat.reversed_axes()
        } else {
            x_mat
        };
        let y_mat = if ctx.attr_bool("transpose_y", false) {
            y_mat.reversed_axes()
        } else {
            y_mat
        };
        if x_mat.ncols() != y_mat.nrows() {
            return Ok(None);
        }

        let product = x_mat.dot(&y_mat).into_dyn();
        Ok(Tensor::from_f64_array(x.dtype(), &product).map(|out| vec![out]))
    }
}

/// Fully connected layer, `x @ weight^T + bias`.
///
/// `weight` has shape `[out_features, in_features]` and `bias` has shape
/// `[out_features]`.
#[derive(Debug, Default)]
pub struct Linear {}

static LINEAR_SIGNATURE: OpSignature = OpSignature::new(
    &[
        InputSpec::new("x"),
        InputSpec::new("weight").const_only(),
        InputSpec::new("bias").const_only().optional(),
    ],
    &[],
);

impl Operator for Linear {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn signature(&self) -> &'static OpSignature {
        &LINEAR_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        let weight = ctx.input_type("weight")?;
        check_float("x", x)?;
        if weight.dtype() != x.dtype() {
            return Err(InferError::DTypeMismatch {
                lhs: x.dtype(),
                rhs: weight.dtype(),
            });
        }
        if x.rank() == 0 {
            return Err(InferError::IncorrectRank {
                param: "x",
                rank: 0,
            });
        }
        if weight.rank() != 2 {
            return Err(InferError::IncorrectRank {
                param: "weight",
                rank: weight.rank(),
            });
        }

        let in_features = &x.shape()[x.rank() - 1];
        let out_features = &weight.shape()[0];
        if !dims_agree(in_features, &weight.shape()[1]) {
            return Err(InferError::InnerDimMismatch {
                lhs: in_features.clone(),
                rhs: weight.shape()[1].clone(),
                transpose_x: false,
                transpose_y: true,
            });
        }

        if let Some(bias) = ctx.opt_input_type("bias") {
            if bias.dtype() != x.dtype() {
                return Err(InferError::DTypeMismatch {
                    lhs: x.dtype(),
                    rhs: bias.dtype(),
                });
            }
            if bias.rank() != 1 || !dims_agree(&bias.shape()[0], out_features) {
                return Err(InferError::ShapeMismatch(format!(
                    "bias shape {} does not match {} output features",
                    bias, out_features
                )));
            }
        }

        let mut out_shape = x.shape()[..x.rank() - 1].to_vec();
        out_shape.push(out_features.clone());
        Ok(vec![TensorType::new(x.dtype(), out_shape)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Linear {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let (Some(x), Some(weight)) = (ctx.const_value("x"), ctx.const_value("weight")) else {
            return Ok(None);
        };
        let Some(weight) = weight
            .to_f64_array()
            .and_then(|w| w.into_dimensionality::<Ix2>().ok())
        else {
            return Ok(None);
        };
        let Some(x_data) = x.to_f64_array() else {
            return Ok(None);
        };

        let in_features = weight.ncols();
        if x.ndim() == 0 || x.shape()[x.ndim() - 1] != in_features {
            return Ok(None);
        }
        let rows = x.len() / in_features.max(1);
        let Ok(x_mat) = x_data.to_shape((rows, in_features)) else {
            return Ok(None);
        };

        let mut product = x_mat.dot(&weight.t());
        match ctx.const_value("bias") {
            Some(bias) => {
                let Some(bias) = bias.to_f64_array() else {
                    return Ok(None);
                };
                let bias: Array1<f64> = bias.iter().copied().collect();
                if bias.len() != product.ncols() {
                    return Ok(None);
                }
                product += &bias;
            }
            None if ctx.input("bias").is_some() => return Ok(None),
            None => {}
        }

        let mut out_shape = x.shape()[..x.ndim() - 1].to_vec();
        out_shape.push(weight.nrows());
        let product = product.into_dyn();
        let Ok(out) = product.to_shape(out_shape) else {
            return Ok(None);
        };
        Ok(Tensor::from_f64_array(x.dtype(), &out.into_owned()).map(|out| vec![out]))
    }
}

/// Activations which [`FusedLinear`] can apply to its output.
pub const FUSED_ACTIVATIONS: [&str; 3] = ["relu", "sigmoid", "tanh"];

fn activation_fn(name: &str) -> Option<fn(f64) -> f64> {
    match name {
        "relu" => Some(|x| x.max(0.)),
        "sigmoid" => Some(|x| 1. / (1. + (-x).exp())),
        "tanh" => Some(f64::tanh),
        _ => None,
    }
}

/// [`Linear`] followed by the elementwise activation named by the
/// `activation` attribute.
#[derive(Debug, Default)]
pub struct FusedLinear {}

static FUSED_LINEAR_SIGNATURE: OpSignature = OpSignature::new(
    &[
        InputSpec::new("x"),
        InputSpec::new("weight").const_only(),
        InputSpec::new("bias").const_only().optional(),
    ],
    &[AttrSpec::required("activation", AttrKind::Str)],
);

impl FusedLinear {
    fn activation(ctx: &InferContext) -> Result<fn(f64) -> f64, InferError> {
        let name = ctx.attr_str("activation").unwrap_or_default();
        activation_fn(name)
            .ok_or_else(|| InferError::InvalidValue(format!("unsupported activation \"{}\"", name)))
    }
}

impl Operator for FusedLinear {
    fn name(&self) -> &'static str {
        "fused_linear"
    }

    fn signature(&self) -> &'static OpSignature {
        &FUSED_LINEAR_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        Self::activation(ctx)?;
        Linear {}.infer(ctx)
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for FusedLinear {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let activation = Self::activation(ctx)?;
        let Some(outputs) = Linear {}.eval(ctx)? else {
            return Ok(None);
        };
        Ok(outputs
            .first()
            .and_then(|out| out.map_float(activation))
            .map(|out| vec![out]))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_abs_diff_eq;
    use milc_testing::TestCases;

    use super::{FusedLinear, Linear, MatMul};
    use crate::operator::{InferContext, InferError, InferInput, Operator};
    use crate::target::TargetVersion;
    use crate::types::{DataType, Dimension, TensorType};
    use crate::value::{Attr, Tensor};

    #[test]
    fn test_matmul_infer() {
        #[derive(Debug)]
        struct Case {
            x: Vec<Dimension>,
            y: Vec<Dimension>,
            transpose_x: bool,
            transpose_y: bool,
            expected: Result<Vec<Dimension>, InferError>,
        }

        let cases = [
            Case {
                x: dims![2, 3],
                y: dims![3, 4],
                transpose_x: false,
                transpose_y: false,
                expected: Ok(dims![2, 4]),
            },
            Case {
                x: dims!["batch", 2, 3],
                y: dims![4, 3],
                transpose_x: false,
                transpose_y: true,
                expected: Ok(dims!["batch", 2, 4]),
            },
            Case {
                x: dims![3, 2],
                y: dims![3],
                transpose_x: true,
                transpose_y: false,
                expected: Ok(dims![2]),
            },
            Case {
                x: dims![5, 2, 3],
                y: dims![1, 3, "n"],
                transpose_x: false,
                transpose_y: false,
                expected: Ok(dims![5, 2, "n"]),
            },
            Case {
                x: dims![2, 3],
                y: dims![4, 3],
                transpose_x: false,
                transpose_y: false,
                expected: Err(InferError::InnerDimMismatch {
                    lhs: Dimension::Fixed(3),
                    rhs: Dimension::Fixed(4),
                    transpose_x: false,
                    transpose_y: false,
                }),
            },
        ];

        cases.test_each(|case| {
            let x = TensorType::new(DataType::Float32, case.x.clone());
            let y = TensorType::new(DataType::Float32, case.y.clone());
            let inputs = [
                InferInput {
                    param: "x",
                    ty: &x,
                    value: None,
                },
                InferInput {
                    param: "y",
                    ty: &y,
                    value: None,
                },
            ];
            let mut attrs = BTreeMap::new();
            attrs.insert("transpose_x", Attr::Bool(case.transpose_x));
            attrs.insert("transpose_y", Attr::Bool(case.transpose_y));
            let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());

            let result = MatMul {}
                .infer(&ctx)
                .map(|types| types[0].shape().to_vec());
            assert_eq!(result, case.expected);
        })
    }

    #[test]
    fn test_matmul_eval() {
        let x = Tensor::from_vec(&[2, 2], vec![1.0f32, 2., 3., 4.]).unwrap();
        let y = Tensor::from_vec(&[2, 2], vec![1.0f32, 0., 0., 2.]).unwrap();
        let (x_ty, y_ty) = (x.tensor_type(), y.tensor_type());
        let inputs = [
            InferInput {
                param: "x",
                ty: &x_ty,
                value: Some(&x),
            },
            InferInput {
                param: "y",
                ty: &y_ty,
                value: Some(&y),
            },
        ];
        let mut attrs = BTreeMap::new();
        attrs.insert("transpose_x", Attr::Bool(true));
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());

        let result = MatMul {}.value_inference().unwrap().eval(&ctx).unwrap();
        let expected = Tensor::from_vec(&[2, 2], vec![1.0f32, 6., 2., 8.]).unwrap();
        assert_eq!(result, Some(vec![expected]));
    }

    #[test]
    fn test_linear() {
        let x = Tensor::from_vec(&[1, 2], vec![1.0f32, 2.]).unwrap();
        let weight = Tensor::from_vec(&[3, 2], vec![1.0f32, 0., 0., 1., 1., 1.]).unwrap();
        let bias = Tensor::from_vec(&[3], vec![0.5f32, 0.5, 0.5]).unwrap();
        let types = [x.tensor_type(), weight.tensor_type(), bias.tensor_type()];
        let inputs = [
            InferInput {
                param: "x",
                ty: &types[0],
                value: Some(&x),
            },
            InferInput {
                param: "weight",
                ty: &types[1],
                value: Some(&weight),
            },
            InferInput {
                param: "bias",
                ty: &types[2],
                value: Some(&bias),
            },
        ];
        let attrs = BTreeMap::new();
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());

        let out_types = Linear {}.infer(&ctx).unwrap();
        assert_eq!(out_types, [TensorType::fixed(DataType::Float32, &[1, 3])]);

        let result = Linear {}.value_inference().unwrap().eval(&ctx).unwrap();
        let expected = Tensor::from_vec(&[1, 3], vec![1.5f32, 2.5, 3.5]).unwrap();
        assert_eq!(result, Some(vec![expected]));
    }

    #[test]
    fn test_fused_linear() {
        #[derive(Debug)]
        struct Case {
            activation: &'static str,
            expected: Result<Vec<f32>, InferError>,
        }

        let cases = [
            Case {
                activation: "relu",
                expected: Ok(vec![0., 1.5]),
            },
            Case {
                activation: "tanh",
                expected: Ok(vec![(-0.5f32).tanh(), 1.5f32.tanh()]),
            },
            Case {
                activation: "gelu",
                expected: Err(InferError::InvalidValue(
                    "unsupported activation \"gelu\"".to_string(),
                )),
            },
        ];

        cases.test_each(|case| {
            let x = Tensor::from_vec(&[1, 2], vec![1.0f32, 2.]).unwrap();
            let weight = Tensor::from_vec(&[2, 2], vec![-1.0f32, 0., 0., 1.]).unwrap();
            let bias = Tensor::from_vec(&[2], vec![0.5f32, -0.5]).unwrap();
            let types = [x.tensor_type(), weight.tensor_type(), bias.tensor_type()];
            let inputs = [
                InferInput {
                    param: "x",
                    ty: &types[0],
                    value: Some(&x),
                },
                InferInput {
                    param: "weight",
                    ty: &types[1],
                    value: Some(&weight),
                },
                InferInput {
                    param: "bias",
                    ty: &types[2],
                    value: Some(&bias),
                },
            ];
            let attrs = BTreeMap::from([("activation", Attr::from(case.activation))]);
            let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());

            let op = FusedLinear {};
            match &case.expected {
                Ok(expected) => {
                    assert_eq!(
                        op.infer(&ctx),
                        Ok(vec![TensorType::fixed(DataType::Float32, &[1, 2])])
                    );
                    let result = op.value_inference().unwrap().eval(&ctx).unwrap().unwrap();
                    assert_eq!(result[0].shape(), &[1, 2]);
                    let values = result[0].to_f64_array().unwrap();
                    for (actual, expected) in values.iter().zip(expected) {
                        assert_abs_diff_eq!(*actual, *expected as f64, epsilon = 1e-6);
                    }
                }
                Err(err) => assert_eq!(op.infer(&ctx).as_ref(), Err(err)),
            }
        })
    }
}
