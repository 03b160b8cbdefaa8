use crate::operator::{
    check_float, check_float_param, check_numeric, DefaultValue, InferContext, InferError,
    InputSpec, OpSignature, Operator, ValueInference,
};
use crate::types::TensorType;
use crate::value::Tensor;

static UNARY_SIGNATURE: OpSignature = OpSignature::new(&[InputSpec::new("x")], &[]);

/// Define a unary op over floats.
macro_rules! float_unary_op {
    ($op:ident, $name:literal, $f:expr) => {
        #[derive(Debug, Default)]
        pub struct $op {}

        impl Operator for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> &'static OpSignature {
                &UNARY_SIGNATURE
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

        impl ValueInference for $op {
            fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
                Ok(ctx
                    .const_value("x")
                    .and_then(|x| x.map_float($f))
                    .map(|out| vec![out]))
            }
        }
    };
}

float_unary_op!(Sqrt, "sqrt", f64::sqrt);
float_unary_op!(Exp, "exp", f64::exp);
float_unary_op!(Erf, "erf", libm::erf);
float_unary_op!(Tanh, "tanh", f64::tanh);
float_unary_op!(Sigmoid, "sigmoid", |x: f64| 1. / (1. + (-x).exp()));

/// Define a unary op over floats and integers.
macro_rules! numeric_unary_op {
    ($op:ident, $name:literal, $f_float:expr, $f_int:expr) => {
        #[derive(Debug, Default)]
        pub struct $op {}

        impl Operator for $op {
            fn name(&self) -> &'static str {
                $name
            }

            fn signature(&self) -> &'static OpSignature {
                &UNARY_SIGNATURE
            }

            fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
                let x = ctx.input_type("x")?;
                check_numeric("x", x)?;
                Ok(vec![x.clone()])
            }

            fn value_inference(&self) -> Option<&dyn ValueInference> {
                Some(self)
            }
        }

        impl ValueInference for $op {
            fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
                Ok(ctx
                    .const_value("x")
                    .and_then(|x| x.map_numeric($f_float, $f_int))
                    .map(|out| vec![out]))
            }
        }
    };
}

numeric_unary_op!(Relu, "relu", |x: f64| x.max(0.), |x: i128| x.max(0));
numeric_unary_op!(Abs, "abs", f64::abs, i128::abs);
numeric_unary_op!(Neg, "neg", |x: f64| -x, |x: i128| -x);

/// Natural logarithm of `x + epsilon`.
#[derive(Debug, Default)]
pub struct Log {}

static LOG_SIGNATURE: OpSignature = OpSignature::new(
    &[
        InputSpec::new("x"),
        InputSpec::new("epsilon")
            .const_only()
            .with_default(DefaultValue::Float(1e-45)),
    ],
    &[],
);

impl Operator for Log {
    fn name(&self) -> &'static str {
        "log"
    }

    fn signature(&self) -> &'static OpSignature {
        &LOG_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        check_float("x", x)?;

        // Epsilon can stay in fp32 when `x` is computed in fp16.
        if let Some(epsilon) = ctx.opt_input_type("epsilon") {
            check_float_param(ctx, x, "epsilon", epsilon)?;
        }
        Ok(vec![x.clone()])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Log {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let Some(x) = ctx.const_value("x") else {
            return Ok(None);
        };
        let epsilon = match ctx.const_value("epsilon") {
            Some(eps) => eps.item_f64().unwrap_or(0.),
            None => 1e-45,
        };
        Ok(x.map_float(|x| (x + epsilon).ln()).map(|out| vec![out]))
    }
}
