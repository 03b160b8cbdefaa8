use std::f64::consts::{FRAC_1_SQRT_2, PI};

use crate::operator::{
    check_float, check_float_param, AttrSpec, DefaultValue, InferContext, InferError, InputSpec,
    OpSignature, Operator, ValueInference,
};
use crate::ops::{GELU_EXACT, GELU_TANH_APPROXIMATION};
use crate::types::TensorType;
use crate::value::{AttrKind, Tensor};

/// Check an activation parameter, which must be a float scalar. From iOS17
/// its float type may differ from the activation input.
fn check_param(ctx: &InferContext, x: &TensorType, name: &'static str) -> Result<(), InferError> {
    match ctx.opt_input_type(name) {
        Some(ty) => check_float_param(ctx, x, name, ty),
        None => Ok(()),
    }
}

fn param_value(ctx: &InferContext, name: &str, default: f64) -> Option<f64> {
    match ctx.input(name) {
        Some(input) => input.value?.item_f64(),
        None => Some(default),
    }
}

/// Define an activation with float parameters passed as const inputs.
macro_rules! parametric_activation {
    ($op:ident, $name:literal, $signature:ident, [$($param:literal = $default:expr),*], $f:expr) => {
        #[derive(Debug, Default)]
        pub struct $op {}

        impl Operator for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> &'static OpSignature {
                &$signature
            }

            fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
                let x = ctx.input_type("x")?;
                check_float("x", x)?;
                $(check_param(ctx, x, $param)?;)*
                Ok(vec![x.clone()])
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
                let params = [$(param_value(ctx, $param, $default)),*];
                let Some(params) = params.into_iter().collect::<Option<Vec<f64>>>() else {
                    return Ok(None);
                };
                let f = $f;
                Ok(x.map_float(|x| f(x, &params)).map(|out| vec![out]))
            }
        }
    };
}

static ELU_SIGNATURE: OpSignature = OpSignature::new(
    &[
        InputSpec::new("x"),
        InputSpec::new("alpha")
            .const_only()
            .with_default(DefaultValue::Float(1.0)),
    ],
    &[],
);

parametric_activation!(Elu, "elu", ELU_SIGNATURE, ["alpha" = 1.0], |x: f64, p: &[f64]| {
    if x > 0. {
        x
    } else {
        p[0] * (x.exp() - 1.)
    }
});

static LEAKY_RELU_SIGNATURE: OpSignature = OpSignature::new(
    &[
        InputSpec::new("x"),
        InputSpec::new("alpha")
            .const_only()
            .with_default(DefaultValue::Float(0.01)),
    ],
    &[],
);

parametric_activation!(
    LeakyRelu,
    "leaky_relu",
    LEAKY_RELU_SIGNATURE,
    ["alpha" = 0.01],
    |x: f64, p: &[f64]| if x >= 0. { x } else { p[0] * x }
);

static LINEAR_ACTIVATION_SIGNATURE: OpSignature = OpSignature::new(
    &[
        InputSpec::new("x"),
        InputSpec::new("alpha").const_only(),
        InputSpec::new("beta")
            .const_only()
            .with_default(DefaultValue::Float(0.0)),
    ],
    &[],
);

parametric_activation!(
    LinearActivation,
    "linear_activation",
    LINEAR_ACTIVATION_SIGNATURE,
    ["alpha" = 1.0, "beta" = 0.0],
    |x: f64, p: &[f64]| p[0] * x + p[1]
);

/// Gaussian error linear unit, computed exactly or with the tanh
/// approximation depending on the `mode` attribute.
#[derive(Debug, Default)]
pub struct Gelu {}

static GELU_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x")],
    &[AttrSpec::optional("mode", AttrKind::Str)],
);

pub(crate) fn gelu(x: f64, approximate: bool) -> f64 {
    if approximate {
        let sqrt_2_pi = (2. / PI).sqrt();
        0.5 * x * (1. + (sqrt_2_pi * (x + 0.044715 * x.powi(3))).tanh())
    } else {
        0.5 * x * (1. + libm::erf(x * FRAC_1_SQRT_2))
    }
}

impl Gelu {
    fn approximate(ctx: &InferContext) -> Result<bool, InferError> {
        match ctx.attr_str("mode").unwrap_or(GELU_EXACT) {
            GELU_EXACT => Ok(false),
            GELU_TANH_APPROXIMATION => Ok(true),
            mode => Err(InferError::InvalidValue(format!(
                "unsupported gelu mode \"{}\"",
                mode
            ))),
        }
    }
}

impl Operator for Gelu {
    fn name(&self) -> &'static str {
        "gelu"
    }

    fn signature(&self) -> &'static OpSignature {
        &GELU_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        check_float("x", x)?;
        Self::approximate(ctx)?;
        Ok(vec![x.clone()])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Gelu {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let approximate = Self::approximate(ctx)?;
        Ok(ctx
            .const_value("x")
            .and_then(|x| x.map_float(|x| gelu(x, approximate)))
            .map(|out| vec![out]))
    }
}

/// Sigmoid linear unit, `x * sigmoid(x)`.
#[derive(Debug, Default)]
pub struct Silu {}

static SILU_SIGNATURE: OpSignature = OpSignature::new(&[InputSpec::new("x")], &[]);

impl Operator for Silu {
    fn name(&self) -> &'static str {
        "silu"
    }

    fn signature(&self) -> &'static OpSignature {
        &SILU_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        check_float("x", x)?;
        Ok(vec![x.clone()])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Silu {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        Ok(ctx
            .const_value("x")
            .and_then(|x| x.map_float(|x| x / (1. + (-x).exp())))
            .map(|out| vec![out]))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_abs_diff_eq;
    use milc_testing::TestCases;

    use super::{gelu, Elu, Gelu, LeakyRelu, LinearActivation};
    use crate::op_registry::OpRegistry;
    use crate::operator::{InferContext, InferError, InferInput, Operator};
    use crate::target::TargetVersion;
    use crate::types::{DataType, TensorType};
    use crate::value::{Attr, Tensor};

    fn eval(op: &dyn Operator, inputs: &[(&'static str, Tensor)]) -> Option<Tensor> {
        let types: Vec<TensorType> = inputs.iter().map(|(_, t)| t.tensor_type()).collect();
        let infer_inputs: Vec<InferInput> = inputs
            .iter()
            .zip(&types)
            .map(|((param, value), ty)| InferInput {
                param: *param,
                ty,
                value: Some(value),
            })
            .collect();
        let attrs = BTreeMap::new();
        let ctx = InferContext::new(&infer_inputs, &attrs, &[], TargetVersion::default());
        op.value_inference()?.eval(&ctx).unwrap().map(|mut out| out.remove(0))
    }

    #[test]
    fn test_parametric_activations() {
        let x = Tensor::from(-2.0f32);

        let elu = eval(&Elu {}, &[("x", x.clone())]).unwrap();
        assert_abs_diff_eq!(elu.item_f64().unwrap(), (-2.0f64).exp() - 1., epsilon = 1e-6);

        let leaky = eval(&LeakyRelu {}, &[("x", x.clone()), ("alpha", Tensor::from(0.5f32))]);
        assert_eq!(leaky, Some(Tensor::from(-1.0f32)));

        let linear = eval(
            &LinearActivation {},
            &[
                ("x", x.clone()),
                ("alpha", Tensor::from(3.0f32)),
                ("beta", Tensor::from(1.0f32)),
            ],
        );
        assert_eq!(linear, Some(Tensor::from(-5.0f32)));
    }

    #[test]
    fn test_mixed_precision_params() {
        #[derive(Debug)]
        struct Case {
            kind: &'static str,
            params: &'static [&'static str],
            fp32_param: &'static str,
        }

        let cases = [
            Case {
                kind: "elu",
                params: &["alpha"],
                fp32_param: "alpha",
            },
            Case {
                kind: "leaky_relu",
                params: &["alpha"],
                fp32_param: "alpha",
            },
            Case {
                kind: "linear_activation",
                params: &["alpha", "beta"],
                fp32_param: "alpha",
            },
            Case {
                kind: "linear_activation",
                params: &["alpha", "beta"],
                fp32_param: "beta",
            },
        ];

        let fp16 = TensorType::scalar(DataType::Float16);
        let fp32 = TensorType::scalar(DataType::Float32);

        cases.test_each(|case| {
            let op = OpRegistry::global().get(case.kind).cloned().unwrap();
            let mut inputs = vec![InferInput {
                param: "x",
                ty: &fp16,
                value: None,
            }];
            for &param in case.params {
                let ty = if param == case.fp32_param { &fp32 } else { &fp16 };
                inputs.push(InferInput {
                    param,
                    ty,
                    value: None,
                });
            }
            let attrs = BTreeMap::new();

            let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::Ios16);
            assert_eq!(
                op.infer(&ctx),
                Err(InferError::DTypeMismatch {
                    lhs: DataType::Float16,
                    rhs: DataType::Float32,
                })
            );

            let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::Ios17);
            assert_eq!(op.infer(&ctx), Ok(vec![fp16.clone()]));
        })
    }

    #[test]
    fn test_gelu_modes() {
        assert_abs_diff_eq!(gelu(1.0, false), 0.8413447460685429, epsilon = 1e-9);
        assert_abs_diff_eq!(gelu(1.0, true), 0.8411919906082768, epsilon = 1e-9);

        let x = TensorType::scalar(DataType::Float32);
        let inputs = [InferInput {
            param: "x",
            ty: &x,
            value: None,
        }];
        let mut attrs = BTreeMap::new();
        attrs.insert("mode", Attr::from("SIGMOID_APPROXIMATION"));
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        assert!(matches!(Gelu {}.infer(&ctx), Err(InferError::InvalidValue(_))));
    }
}
