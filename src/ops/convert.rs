use crate::operator::{
    AttrSpec, InferContext, InferError, InputSpec, OpSignature, Operator, ValueInference,
};
use crate::types::{DataType, TensorType};
use crate::value::{AttrKind, Tensor};

/// Convert elements to the type named by the `dtype` attribute, eg. "fp16".
#[derive(Debug, Default)]
pub struct Cast {}

static CAST_SIGNATURE: OpSignature = OpSignature::new(
    &[InputSpec::new("x")],
    &[AttrSpec::required("dtype", AttrKind::Str)],
);

impl Cast {
    fn target_dtype(ctx: &InferContext) -> Result<DataType, InferError> {
        let name = ctx.attr_str("dtype").unwrap_or_default();
        match DataType::from_name(name) {
            Some(DataType::String) | None => Err(InferError::InvalidValue(format!(
                "cannot cast to \"{}\"",
                name
            ))),
            Some(dtype) => Ok(dtype),
        }
    }
}

impl Operator for Cast {
    fn name(&self) -> &'static str {
        "cast"
    }

    fn signature(&self) -> &'static OpSignature {
        &CAST_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let x = ctx.input_type("x")?;
        if x.dtype() == DataType::String {
            return Err(InferError::UnsupportedType {
                param: "x",
                dtype: x.dtype(),
            });
        }
        let dtype = Self::target_dtype(ctx)?;
        Ok(vec![x.with_dtype(dtype)])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Cast {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        let Some(x) = ctx.const_value("x") else {
            return Ok(None);
        };
        let dtype = Self::target_dtype(ctx)?;
        Ok(x.cast(dtype).map(|out| vec![out]))
    }
}

/// Produces the tensor stored in the `val` attribute.
///
/// Programs store constants as constant values rather than operations. This
/// kind exists so that constants can be created through the same interface
/// as other ops, and is how constants are represented in serialized
/// programs.
#[derive(Debug, Default)]
pub struct Const {}

static CONST_SIGNATURE: OpSignature =
    OpSignature::new(&[], &[AttrSpec::required("val", AttrKind::Tensor)]);

impl Const {
    fn value<'a>(ctx: &InferContext<'a>) -> Result<&'a Tensor, InferError> {
        ctx.attr("val")
            .and_then(|val| val.as_tensor())
            .ok_or_else(|| InferError::InvalidValue("const requires a tensor \"val\"".into()))
    }
}

impl Operator for Const {
    fn name(&self) -> &'static str {
        "const"
    }

    fn signature(&self) -> &'static OpSignature {
        &CONST_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        Ok(vec![Self::value(ctx)?.tensor_type()])
    }

    fn value_inference(&self) -> Option<&dyn ValueInference> {
        Some(self)
    }
}

impl ValueInference for Const {
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError> {
        Ok(Some(vec![Self::value(ctx)?.clone()]))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Cast, Const};
    use crate::operator::{InferContext, InferError, InferInput, Operator};
    use crate::target::TargetVersion;
    use crate::types::{DataType, TensorType};
    use crate::value::{Attr, Tensor};

    #[test]
    fn test_cast() {
        let x = Tensor::from_vec(&[2], vec![1.5f32, -2.0]).unwrap();
        let ty = x.tensor_type();
        let inputs = [InferInput {
            param: "x",
            ty: &ty,
            value: Some(&x),
        }];
        let mut attrs = BTreeMap::new();
        attrs.insert("dtype", Attr::from(DataType::Float16));
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());

        assert_eq!(
            Cast {}.infer(&ctx),
            Ok(vec![TensorType::fixed(DataType::Float16, &[2])])
        );
        let result = Cast {}.value_inference().unwrap().eval(&ctx).unwrap();
        assert_eq!(result, Some(vec![x.cast(DataType::Float16).unwrap()]));

        attrs.insert("dtype", Attr::from("float"));
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::default());
        assert!(matches!(Cast {}.infer(&ctx), Err(InferError::InvalidValue(_))));
    }

    #[test]
    fn test_const() {
        let val = Tensor::from(8i32);
        let mut attrs = BTreeMap::new();
        attrs.insert("val", Attr::from(val.clone()));
        let ctx = InferContext::new(&[], &attrs, &[], TargetVersion::default());

        assert_eq!(Const {}.infer(&ctx), Ok(vec![TensorType::scalar(DataType::Int32)]));
        let result = Const {}.value_inference().unwrap().eval(&ctx).unwrap();
        assert_eq!(result, Some(vec![val]));
    }
}
