//! The [`Operator`] trait for defining op kinds.

use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};

use crate::target::TargetVersion;
use crate::types::{BroadcastError, DataType, Dimension, ShapeDisplay, TensorType};
use crate::value::{Attr, AttrKind, Tensor};

/// Default value of an optional input.
///
/// Defaults are materialized as fp32 or int32 scalar constants when an op
/// is added without binding the input.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DefaultValue {
    Float(f32),
    Int(i32),
}

impl DefaultValue {
    pub fn to_tensor(self) -> Tensor {
        match self {
            DefaultValue::Float(x) => Tensor::from(x),
            DefaultValue::Int(x) => Tensor::from(x),
        }
    }
}

/// Declared input of an op kind.
#[derive(Copy, Clone, Debug)]
pub struct InputSpec {
    pub name: &'static str,

    /// True if the input may be left unbound.
    pub optional: bool,

    /// True if the input must be bound to a constant.
    pub const_only: bool,

    /// True if the input accepts a list of values.
    pub variadic: bool,

    pub default: Option<DefaultValue>,
}

impl InputSpec {
    pub const fn new(name: &'static str) -> InputSpec {
        InputSpec {
            name,
            optional: false,
            const_only: false,
            variadic: false,
            default: None,
        }
    }

    pub const fn optional(self) -> InputSpec {
        InputSpec {
            optional: true,
            ..self
        }
    }

    pub const fn const_only(self) -> InputSpec {
        InputSpec {
            const_only: true,
            ..self
        }
    }

    pub const fn variadic(self) -> InputSpec {
        InputSpec {
            variadic: true,
            ..self
        }
    }

    /// Set the default value. This implies the input is optional.
    pub const fn with_default(self, default: DefaultValue) -> InputSpec {
        InputSpec {
            optional: true,
            default: Some(default),
            ..self
        }
    }
}

/// Declared attribute of an op kind.
#[derive(Copy, Clone, Debug)]
pub struct AttrSpec {
    pub name: &'static str,
    pub kind: AttrKind,
    pub required: bool,
}

impl AttrSpec {
    pub const fn required(name: &'static str, kind: AttrKind) -> AttrSpec {
        AttrSpec {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: AttrKind) -> AttrSpec {
        AttrSpec {
            name,
            kind,
            required: false,
        }
    }
}

/// Input and attribute schema of an op kind.
#[derive(Debug)]
pub struct OpSignature {
    /// Inputs, in the order they are stored in an operation.
    pub inputs: &'static [InputSpec],
    pub attrs: &'static [AttrSpec],

    /// Number of nested blocks an operation of this kind owns.
    pub blocks: usize,
}

impl OpSignature {
    pub const fn new(inputs: &'static [InputSpec], attrs: &'static [AttrSpec]) -> OpSignature {
        OpSignature {
            inputs,
            attrs,
            blocks: 0,
        }
    }

    pub const fn with_blocks(self, blocks: usize) -> OpSignature {
        OpSignature { blocks, ..self }
    }

    pub fn input(&self, name: &str) -> Option<&'static InputSpec> {
        self.inputs.iter().find(|spec| spec.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&'static AttrSpec> {
        self.attrs.iter().find(|spec| spec.name == name)
    }
}

/// Input and output types of a nested block, as seen by the op which owns
/// it.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockInterface {
    pub inputs: Vec<TensorType>,
    pub outputs: Vec<TensorType>,
}

/// A value bound to an operation input, as seen during inference.
#[derive(Clone, Debug)]
pub struct InferInput<'a> {
    /// Name of the input in the op signature.
    pub param: &'static str,
    pub ty: &'a TensorType,

    /// Value of the input, if it is a constant.
    pub value: Option<&'a Tensor>,
}

/// Inputs to an op's type and value inference functions.
pub struct InferContext<'a> {
    inputs: &'a [InferInput<'a>],
    attrs: &'a BTreeMap<&'static str, Attr>,
    blocks: &'a [BlockInterface],
    target: TargetVersion,
}

impl<'a> InferContext<'a> {
    /// Create a context from a flattened input list.
    ///
    /// Inputs must appear in signature order. Variadic inputs appear once per
    /// bound value.
    pub fn new(
        inputs: &'a [InferInput<'a>],
        attrs: &'a BTreeMap<&'static str, Attr>,
        blocks: &'a [BlockInterface],
        target: TargetVersion,
    ) -> Self {
        InferContext {
            inputs,
            attrs,
            blocks,
            target,
        }
    }

    pub fn inputs(&self) -> &'a [InferInput<'a>] {
        self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&'a InferInput<'a>> {
        self.inputs.iter().find(|input| input.param == name)
    }

    /// Return the type of a required input.
    pub fn input_type(&self, name: &'static str) -> Result<&'a TensorType, InferError> {
        self.input(name)
            .map(|input| input.ty)
            .ok_or(InferError::MissingInput(name))
    }

    /// Return the type of an input which may be unbound.
    pub fn opt_input_type(&self, name: &str) -> Option<&'a TensorType> {
        self.input(name).map(|input| input.ty)
    }

    /// Return all values bound to a variadic input.
    pub fn variadic(&self, name: &str) -> Vec<&'a InferInput<'a>> {
        self.inputs.iter().filter(|input| input.param == name).collect()
    }

    /// Return the value of an input if it is a constant.
    pub fn const_value(&self, name: &str) -> Option<&'a Tensor> {
        self.input(name).and_then(|input| input.value)
    }

    /// Return true if every bound input is a constant.
    pub fn all_const(&self) -> bool {
        self.inputs.iter().all(|input| input.value.is_some())
    }

    pub fn attr(&self, name: &str) -> Option<&'a Attr> {
        self.attrs.get(name)
    }

    pub fn attr_bool(&self, name: &str, default: bool) -> bool {
        self.attr(name).and_then(Attr::as_bool).unwrap_or(default)
    }

    pub fn attr_int(&self, name: &str, default: i64) -> i64 {
        self.attr(name).and_then(Attr::as_int).unwrap_or(default)
    }

    pub fn attr_ints(&self, name: &str) -> Option<&'a [i64]> {
        self.attr(name).and_then(Attr::as_ints)
    }

    pub fn attr_str(&self, name: &str) -> Option<&'a str> {
        self.attr(name).and_then(Attr::as_str)
    }

    pub fn blocks(&self) -> &'a [BlockInterface] {
        self.blocks
    }

    pub fn target(&self) -> TargetVersion {
        self.target
    }
}

/// Category of an [`InferError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InferErrorKind {
    Type,
    Shape,
}

/// Errors returned by type, shape and value inference.
#[derive(Clone, Debug, PartialEq)]
pub enum InferError {
    /// Input shapes cannot be broadcast together. `dim` is the index of the
    /// conflicting dimension in the broadcast output.
    IncompatibleShapes {
        dim: usize,
        lhs: Dimension,
        rhs: Dimension,
        lhs_shape: Vec<Dimension>,
        rhs_shape: Vec<Dimension>,
    },

    /// Two inputs which must have the same element type don't.
    DTypeMismatch { lhs: DataType, rhs: DataType },

    /// An input has an element type the op doesn't accept.
    UnsupportedType {
        param: &'static str,
        dtype: DataType,
    },

    /// An input has a rank the op doesn't accept.
    IncorrectRank { param: &'static str, rank: usize },

    /// An axis is outside `[-rank, rank)`.
    InvalidAxis { axis: i64, rank: usize },

    /// An axis appears more than once in an axis list.
    DuplicateAxis(usize),

    /// Inner dimensions of a matrix multiplication don't match.
    InnerDimMismatch {
        lhs: Dimension,
        rhs: Dimension,
        transpose_x: bool,
        transpose_y: bool,
    },

    /// An index is outside the size of the indexed dimension.
    IndexOutOfBounds { index: i64, size: usize },

    /// Input shapes are inconsistent with each other or with attributes.
    ShapeMismatch(String),

    /// An input or attribute has an invalid value.
    InvalidValue(String),

    /// A nested block's interface doesn't agree with the op which owns it.
    BlockMismatch(String),

    /// A required input was not bound.
    MissingInput(&'static str),
}

impl InferError {
    pub fn kind(&self) -> InferErrorKind {
        match self {
            InferError::IncompatibleShapes { .. }
            | InferError::IncorrectRank { .. }
            | InferError::InvalidAxis { .. }
            | InferError::DuplicateAxis(_)
            | InferError::InnerDimMismatch { .. }
            | InferError::IndexOutOfBounds { .. }
            | InferError::ShapeMismatch(_)
            | InferError::BlockMismatch(_) => InferErrorKind::Shape,
            InferError::DTypeMismatch { .. }
            | InferError::UnsupportedType { .. }
            | InferError::InvalidValue(_)
            | InferError::MissingInput(_) => InferErrorKind::Type,
        }
    }

    /// Create an error for a failed broadcast of `lhs_shape` and `rhs_shape`.
    pub fn broadcast(err: BroadcastError, lhs_shape: &[Dimension], rhs_shape: &[Dimension]) -> Self {
        InferError::IncompatibleShapes {
            dim: err.dim,
            lhs: err.lhs,
            rhs: err.rhs,
            lhs_shape: lhs_shape.to_vec(),
            rhs_shape: rhs_shape.to_vec(),
        }
    }
}

impl Display for InferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferError::IncompatibleShapes {
                dim,
                lhs,
                rhs,
                lhs_shape,
                rhs_shape,
            } => write!(
                f,
                "shapes {} and {} are not broadcast-compatible: dimension {} has sizes {} and {}",
                ShapeDisplay(lhs_shape),
                ShapeDisplay(rhs_shape),
                dim,
                lhs,
                rhs
            ),
            InferError::DTypeMismatch { lhs, rhs } => {
                write!(f, "element types {} and {} do not match", lhs, rhs)
            }
            InferError::UnsupportedType { param, dtype } => {
                write!(f, "input \"{}\" has unsupported type {}", param, dtype)
            }
            InferError::IncorrectRank { param, rank } => {
                write!(f, "input \"{}\" has unsupported rank {}", param, rank)
            }
            InferError::InvalidAxis { axis, rank } => {
                write!(f, "axis {} is out of range for rank {}", axis, rank)
            }
            InferError::DuplicateAxis(axis) => write!(f, "axis {} is repeated", axis),
            InferError::InnerDimMismatch {
                lhs,
                rhs,
                transpose_x,
                transpose_y,
            } => write!(
                f,
                "inner dimensions {} and {} do not match (transpose_x={}, transpose_y={})",
                lhs, rhs, transpose_x, transpose_y
            ),
            InferError::IndexOutOfBounds { index, size } => {
                write!(f, "index {} is out of bounds for dimension of size {}", index, size)
            }
            InferError::ShapeMismatch(msg) => write!(f, "shape mismatch: {}", msg),
            InferError::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
            InferError::BlockMismatch(msg) => write!(f, "block mismatch: {}", msg),
            InferError::MissingInput(name) => write!(f, "missing input \"{}\"", name),
        }
    }
}

impl Error for InferError {}

/// Errors from validating an operation against its kind's signature.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaError {
    UnknownInput(String),
    MissingInput(&'static str),
    UnknownAttr(String),
    MissingAttr(&'static str),

    /// An attribute literal has the wrong kind.
    AttrType {
        name: &'static str,
        expected: AttrKind,
        actual: AttrKind,
    },

    /// A non-constant value was bound to a const-only input.
    NonConstInput(&'static str),

    /// More than one value was bound to a non-variadic input.
    TooManyValues(&'static str),

    /// The number of nested blocks is wrong.
    BlockCount { expected: usize, actual: usize },

    /// The op kind requires a newer target.
    UnavailableAtTarget {
        min: TargetVersion,
        target: TargetVersion,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::UnknownInput(name) => write!(f, "unknown input \"{}\"", name),
            SchemaError::MissingInput(name) => write!(f, "missing required input \"{}\"", name),
            SchemaError::UnknownAttr(name) => write!(f, "unknown attribute \"{}\"", name),
            SchemaError::MissingAttr(name) => {
                write!(f, "missing required attribute \"{}\"", name)
            }
            SchemaError::AttrType {
                name,
                expected,
                actual,
            } => write!(
                f,
                "attribute \"{}\" expects {} but got {}",
                name, expected, actual
            ),
            SchemaError::NonConstInput(name) => {
                write!(f, "input \"{}\" must be a constant", name)
            }
            SchemaError::TooManyValues(name) => {
                write!(f, "input \"{}\" accepts a single value", name)
            }
            SchemaError::BlockCount { expected, actual } => {
                write!(f, "expected {} nested blocks but got {}", expected, actual)
            }
            SchemaError::UnavailableAtTarget { min, target } => write!(
                f,
                "op requires target {} or newer but the program targets {}",
                min, target
            ),
        }
    }
}

impl Error for SchemaError {}

/// Computes constant outputs of an op whose inputs are all constants.
pub trait ValueInference {
    /// Evaluate the op.
    ///
    /// Every input in `ctx` has a value. Returns `Ok(None)` if the op can't
    /// be evaluated for these inputs (eg. an unsupported dtype), in which
    /// case it is left in the graph.
    fn eval(&self, ctx: &InferContext) -> Result<Option<Vec<Tensor>>, InferError>;
}

/// An op kind: a signature plus type inference and optional value inference.
///
/// Operators are stateless. All per-operation parameters are attributes or
/// inputs of the operation.
pub trait Operator: Any + Debug {
    /// Name of the op kind, eg. "matmul".
    fn name(&self) -> &'static str;

    fn signature(&self) -> &'static OpSignature;

    /// Compute output types from input types and attributes.
    ///
    /// This must be deterministic and must not depend on any state other
    /// than `ctx`.
    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError>;

    /// Return the value inference implementation, if this op supports
    /// constant folding.
    fn value_inference(&self) -> Option<&dyn ValueInference> {
        None
    }

    /// Return true if this is a binary op whose inputs can be swapped.
    fn is_commutative(&self) -> bool {
        false
    }

    /// Oldest target which supports this op kind.
    fn min_target(&self) -> TargetVersion {
        TargetVersion::Ios15
    }
}

/// Return true if `ty` has a float element type.
pub(crate) fn check_float(param: &'static str, ty: &TensorType) -> Result<(), InferError> {
    if ty.dtype().is_float() {
        Ok(())
    } else {
        Err(InferError::UnsupportedType {
            param,
            dtype: ty.dtype(),
        })
    }
}

/// Oldest target which accepts a float scalar parameter whose element type
/// differs from the op's main input, such as an fp32 `alpha` for fp16 `x`.
pub(crate) const MIXED_FLOAT_PARAMS_SINCE: TargetVersion = TargetVersion::Ios17;

/// Check a float scalar parameter `param` of type `ty` against the main
/// input `x`.
pub(crate) fn check_float_param(
    ctx: &InferContext,
    x: &TensorType,
    param: &'static str,
    ty: &TensorType,
) -> Result<(), InferError> {
    check_float(param, ty)?;
    if !ty.is_scalar() {
        return Err(InferError::IncorrectRank {
            param,
            rank: ty.rank(),
        });
    }
    if ty.dtype() != x.dtype() && ctx.target() < MIXED_FLOAT_PARAMS_SINCE {
        return Err(InferError::DTypeMismatch {
            lhs: x.dtype(),
            rhs: ty.dtype(),
        });
    }
    Ok(())
}

pub(crate) fn check_numeric(param: &'static str, ty: &TensorType) -> Result<(), InferError> {
    if ty.dtype().is_numeric() {
        Ok(())
    } else {
        Err(InferError::UnsupportedType {
            param,
            dtype: ty.dtype(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{InferContext, InferError, InferErrorKind, InferInput, InputSpec, DefaultValue};
    use crate::target::TargetVersion;
    use crate::types::{DataType, Dimension, TensorType};
    use crate::value::{Attr, Tensor};

    #[test]
    fn test_input_spec_builder() {
        const SPEC: InputSpec = InputSpec::new("epsilon")
            .const_only()
            .with_default(DefaultValue::Float(1e-45));
        assert!(SPEC.optional);
        assert!(SPEC.const_only);
        assert!(!SPEC.variadic);
        assert_eq!(SPEC.default.map(|d| d.to_tensor()), Some(Tensor::from(1e-45f32)));
    }

    #[test]
    fn test_infer_context() {
        let x_type = TensorType::fixed(DataType::Float32, &[2]);
        let y_type = TensorType::scalar(DataType::Int32);
        let y_val = Tensor::from(3i32);
        let inputs = [
            InferInput {
                param: "values",
                ty: &x_type,
                value: None,
            },
            InferInput {
                param: "values",
                ty: &x_type,
                value: None,
            },
            InferInput {
                param: "axis",
                ty: &y_type,
                value: Some(&y_val),
            },
        ];
        let mut attrs = BTreeMap::new();
        attrs.insert("keep_dims", Attr::Bool(true));
        let ctx = InferContext::new(&inputs, &attrs, &[], TargetVersion::Ios16);

        assert_eq!(ctx.variadic("values").len(), 2);
        assert_eq!(ctx.const_value("axis"), Some(&y_val));
        assert_eq!(ctx.const_value("values"), None);
        assert!(!ctx.all_const());
        assert!(ctx.attr_bool("keep_dims", false));
        assert_eq!(ctx.attr_int("axis", -1), -1);
        assert_eq!(ctx.input_type("missing"), Err(InferError::MissingInput("missing")));
        assert_eq!(ctx.target(), TargetVersion::Ios16);
    }

    #[test]
    fn test_error_kinds() {
        let shape_err = InferError::IncompatibleShapes {
            dim: 0,
            lhs: Dimension::Fixed(3),
            rhs: Dimension::Fixed(4),
            lhs_shape: vec![Dimension::Fixed(3)],
            rhs_shape: vec![Dimension::Fixed(4)],
        };
        assert_eq!(shape_err.kind(), InferErrorKind::Shape);
        assert_eq!(
            shape_err.to_string(),
            "shapes [3] and [4] are not broadcast-compatible: dimension 0 has sizes 3 and 4"
        );

        let type_err = InferError::DTypeMismatch {
            lhs: DataType::Float32,
            rhs: DataType::Int32,
        };
        assert_eq!(type_err.kind(), InferErrorKind::Type);
    }
}
