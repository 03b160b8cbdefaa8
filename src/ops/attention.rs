use crate::operator::{check_float, InferContext, InferError, InputSpec, OpSignature, Operator};
use crate::target::TargetVersion;
use crate::types::{broadcast_shapes, DataType, Dimension, TensorType};

/// Fused attention, `softmax(Q @ K^T / sqrt(E) + mask) @ V`.
///
/// Shapes are `query: [..., L, E]`, `key: [..., S, E]`, `value: [..., S, Ev]`
/// and the output is `[..., L, Ev]`. Leading batch dimensions broadcast.
/// The optional `attn_mask` is either boolean or has the query's float
/// type, and must broadcast to `[..., L, S]`.
#[derive(Debug, Default)]
pub struct ScaledDotProductAttention {}

static SDPA_SIGNATURE: OpSignature = OpSignature::new(
    &[
        InputSpec::new("query"),
        InputSpec::new("key"),
        InputSpec::new("value"),
        InputSpec::new("attn_mask").optional(),
    ],
    &[],
);

fn same_size(a: &Dimension, b: &Dimension) -> bool {
    a == b || a.is_symbolic() || b.is_symbolic()
}

impl Operator for ScaledDotProductAttention {
    fn name(&self) -> &'static str {
        "scaled_dot_product_attention"
    }

    fn signature(&self) -> &'static OpSignature {
        &SDPA_SIGNATURE
    }

    fn infer(&self, ctx: &InferContext) -> Result<Vec<TensorType>, InferError> {
        let query = ctx.input_type("query")?;
        let key = ctx.input_type("key")?;
        let value = ctx.input_type("value")?;
        check_float("query", query)?;

        for (param, ty) in [("query", query), ("key", key), ("value", value)] {
            if ty.dtype() != query.dtype() {
                return Err(InferError::DTypeMismatch {
                    lhs: query.dtype(),
                    rhs: ty.dtype(),
                });
            }
            if ty.rank() < 3 {
                return Err(InferError::IncorrectRank {
                    param,
                    rank: ty.rank(),
                });
            }
        }

        let split = |ty: &TensorType| -> (Vec<Dimension>, Dimension, Dimension) {
            let shape = ty.shape();
            let n = shape.len();
            (shape[..n - 2].to_vec(), shape[n - 2].clone(), shape[n - 1].clone())
        };
        let (q_batch, target_len, embed) = split(query);
        let (k_batch, source_len, k_embed) = split(key);
        let (v_batch, v_source_len, v_embed) = split(value);

        if !same_size(&embed, &k_embed) {
            return Err(InferError::InnerDimMismatch {
                lhs: embed,
                rhs: k_embed,
                transpose_x: false,
                transpose_y: true,
            });
        }
        if !same_size(&source_len, &v_source_len) {
            return Err(InferError::ShapeMismatch(format!(
                "key has sequence length {} but value has {}",
                source_len, v_source_len
            )));
        }

        let batch = broadcast_shapes(&q_batch, &k_batch)
            .map_err(|err| InferError::broadcast(err, &q_batch, &k_batch))?;
        let batch = broadcast_shapes(&batch, &v_batch)
            .map_err(|err| InferError::broadcast(err, &batch, &v_batch))?;

        if let Some(mask) = ctx.opt_input_type("attn_mask") {
            if !mask.dtype().is_float() && mask.dtype() != DataType::Bool {
                return Err(InferError::UnsupportedType {
                    param: "attn_mask",
                    dtype: mask.dtype(),
                });
            }
            if mask.dtype().is_float() && mask.dtype() != query.dtype() {
                return Err(InferError::DTypeMismatch {
                    lhs: query.dtype(),
                    rhs: mask.dtype(),
                });
            }
            let mut scores_shape = batch.clone();
            scores_shape.push(target_len.clone());
            scores_shape.push(source_len.clone());
            broadcast_shapes(&scores_shape, mask.shape())
                .map_err(|err| InferError::broadcast(err, &scores_shape, mask.shape()))?;
        }

        let mut out_shape = batch;
        out_shape.push(target_len);
        out_shape.push(v_embed);
        Ok(vec![TensorType::new(query.dtype(), out_shape)])
    }

    fn min_target(&self) -> TargetVersion {
        TargetVersion::Ios18
    }
}
