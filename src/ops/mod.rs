//! Catalog of built-in op kinds.
//!
//! Each op kind is a unit struct implementing [`Operator`], plus
//! [`ValueInference`](crate::operator::ValueInference) if it can be
//! evaluated during constant folding.

use smallvec::SmallVec;

use crate::operator::InferError;
use crate::types::resolve_axis;

mod activations;
mod attention;
mod binary_elementwise;
mod concat;
mod control_flow;
mod convert;
mod gather;
mod layout;
mod matmul;
mod reduce;
mod unary_elementwise;

pub use activations::{Elu, Gelu, LeakyRelu, LinearActivation, Silu};
pub use attention::ScaledDotProductAttention;
pub use binary_elementwise::{
    Add, Equal, Greater, Less, Maximum, Minimum, Mul, Pow, RealDiv, Sub,
};
pub use concat::Concat;
pub use control_flow::{Cond, WhileLoop};
pub use convert::{Cast, Const};
pub use gather::Gather;
pub use layout::{ExpandDims, Identity, Reshape, Squeeze, Transpose};
pub use matmul::{FusedLinear, Linear, MatMul, FUSED_ACTIVATIONS};
pub use reduce::{ReduceMax, ReduceMean, ReduceSum};
pub use unary_elementwise::{Abs, Erf, Exp, Log, Neg, Relu, Sigmoid, Sqrt, Tanh};

pub use crate::operator::Operator;

/// GELU computation modes accepted by the `mode` attribute of [`Gelu`].
pub const GELU_EXACT: &str = "EXACT";
pub const GELU_TANH_APPROXIMATION: &str = "TANH_APPROXIMATION";

/// Resolve a list of axes in `[-rank, rank)` to positive indices.
///
/// Fails if an axis is out of range or appears more than once (after
/// resolving negative values).
pub(crate) fn resolve_axes(rank: usize, axes: &[i64]) -> Result<SmallVec<[usize; 4]>, InferError> {
    let mut resolved: SmallVec<[usize; 4]> = SmallVec::with_capacity(axes.len());
    for &axis in axes {
        let axis_idx = resolve_axis(rank, axis).ok_or(InferError::InvalidAxis { axis, rank })?;
        if resolved.contains(&axis_idx) {
            return Err(InferError::DuplicateAxis(axis_idx));
        }
        resolved.push(axis_idx);
    }
    Ok(resolved)
}

/// Resolve a single axis in `[-rank, rank)` to a positive index.
pub(crate) fn resolve_single_axis(rank: usize, axis: i64) -> Result<usize, InferError> {
    resolve_axis(rank, axis).ok_or(InferError::InvalidAxis { axis, rank })
}
