use std::any::Any;
use std::collections::BTreeMap;
use std::f32::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

use crate::graph::{Block, NodeId, OperatorNode};
use crate::ops::{FUSED_ACTIVATIONS, GELU_EXACT, GELU_TANH_APPROXIMATION};
use crate::value::Attr;

use super::pattern_matcher::{Match, Pattern};
use super::{BlockPass, Fusion, FusionInput, GraphMutator, OptimizeError, PassContext};

/// Interface for block visitors which match subgraph patterns and return
/// fused operations.
trait FusionVisitor {
    /// Prepare for a block traversal by creating pattern matchers or other
    /// required state.
    fn prepare(&self, block: &Block) -> Box<dyn Any>;

    /// Visit an operator in the block and potentially return a fusion for it.
    ///
    /// `state` is the result of a call to [`prepare`](FusionVisitor::prepare)
    /// before traversing the block.
    fn maybe_fuse(
        &self,
        state: &dyn Any,
        block: &Block,
        op_node_id: NodeId,
        op_node: &OperatorNode,
    ) -> Option<Fusion>;
}

/// Defines a fusion that matches one of several patterns with a single
/// input "x" and replaces the match with a unary op.
///
/// This is a simplified version of [`FusionVisitor`].
trait UnaryOpFusion {
    /// Kind of the fused op.
    fn kind(&self) -> &'static str;

    /// Return the patterns to match.
    ///
    /// Each pattern should have a single input symbol named "x".
    fn patterns(&self) -> Vec<Pattern>;

    /// Return the fused op's attributes given a successful match for the
    /// `index`th pattern.
    ///
    /// This can fail if there are additional requirements which cannot be
    /// expressed in the pattern.
    fn maybe_fuse(
        &self,
        index: usize,
        pat_match: &Match,
        block: &Block,
    ) -> Option<BTreeMap<&'static str, Attr>>;

    /// Wrap this fusion into a [`FusionVisitor`].
    fn into_visitor(self) -> UnaryOpFusionVisitor<Self>
    where
        Self: Sized,
    {
        UnaryOpFusionVisitor(self)
    }
}

/// Wraps a [`UnaryOpFusion`] to implement [`FusionVisitor`].
struct UnaryOpFusionVisitor<F: UnaryOpFusion>(F);

impl<U: UnaryOpFusion> FusionVisitor for UnaryOpFusionVisitor<U> {
    fn prepare(&self, _: &Block) -> Box<dyn Any> {
        Box::new(self.0.patterns())
    }

    fn maybe_fuse(
        &self,
        state: &dyn Any,
        block: &Block,
        _op_node_id: NodeId,
        op_node: &OperatorNode,
    ) -> Option<Fusion> {
        let patterns: &Vec<Pattern> = state.downcast_ref()?;
        let output_id = *op_node.output_ids().first()?;
        let (index, pat_match) = patterns
            .iter()
            .enumerate()
            .find_map(|(i, pattern)| pattern.test(output_id, block).map(|m| (i, m)))?;
        let input_id = pat_match.node_id("x")?;
        let attrs = self.0.maybe_fuse(index, &pat_match, block)?;
        Some(Fusion {
            kind: self.0.kind(),
            inputs: vec![("x", FusionInput::Value(input_id))],
            attrs,
            output_ids: vec![output_id],
        })
    }
}

/// Number of exact GELU patterns. Patterns after these use the tanh
/// approximation.
const EXACT_GELU_PATTERNS: usize = 6;

/// Fuses the exact and tanh-approximated forms of GELU.
///
/// The exact form is `x * 0.5 * (1 + erf(x / sqrt(2)))`. Converters write
/// this with different associativity and sometimes multiply by
/// `1 / sqrt(2)` instead of dividing, so each variant is a separate
/// pattern.
struct GeluFusion {}

impl GeluFusion {
    /// Return the three ways of associating `x * 0.5 * rest`.
    fn half_x_times(rest: Pattern) -> [Pattern; 3] {
        let x = Pattern::symbol("x");
        [
            (x.clone() * 0.5) * rest.clone(),
            x.clone() * (rest.clone() * 0.5),
            (x * rest) * 0.5,
        ]
    }
}

impl UnaryOpFusion for GeluFusion {
    fn kind(&self) -> &'static str {
        "gelu"
    }

    fn patterns(&self) -> Vec<Pattern> {
        let x = Pattern::symbol("x");
        let erf_term = |scaled: Pattern| 1.0 + Pattern::unary_op("erf", scaled);

        let mut patterns = Vec::new();
        patterns.extend(Self::half_x_times(erf_term(x.clone() / SQRT_2)));
        patterns.extend(Self::half_x_times(erf_term(x.clone() * FRAC_1_SQRT_2)));
        debug_assert_eq!(patterns.len(), EXACT_GELU_PATTERNS);

        // See https://arxiv.org/abs/1606.08415.
        let sqrt_2_pi = (2.0f32 / PI).sqrt();
        let cube = Pattern::binary_op("pow", x.clone(), 3.0);
        let tanh_term =
            1.0 + Pattern::unary_op("tanh", sqrt_2_pi * (x.clone() + cube * 0.044715));
        patterns.extend(Self::half_x_times(tanh_term));

        patterns
    }

    fn maybe_fuse(&self, index: usize, _: &Match, _: &Block) -> Option<BTreeMap<&'static str, Attr>> {
        let mode = if index < EXACT_GELU_PATTERNS {
            GELU_EXACT
        } else {
            GELU_TANH_APPROXIMATION
        };
        Some([("mode", Attr::from(mode))].into())
    }
}

/// Fuses `x * sigmoid(x)`.
struct SiluFusion {}

impl UnaryOpFusion for SiluFusion {
    fn kind(&self) -> &'static str {
        "silu"
    }

    fn patterns(&self) -> Vec<Pattern> {
        let x = Pattern::symbol("x");
        vec![x.clone() * Pattern::unary_op("sigmoid", x)]
    }

    fn maybe_fuse(&self, _: usize, _: &Match, _: &Block) -> Option<BTreeMap<&'static str, Attr>> {
        Some(BTreeMap::new())
    }
}

/// Fuses `matmul(x, W) + b` into `linear(x, W', b)` where `W` and `b` are
/// constants and `W'` is `W` in `[out, in]` layout.
struct LinearFusion {}

impl FusionVisitor for LinearFusion {
    fn prepare(&self, _: &Block) -> Box<dyn Any> {
        let matmul = Pattern::binary_op("matmul", Pattern::symbol("x"), Pattern::const_symbol("w"))
            .with_flag("transpose_x", false)
            .named("matmul");
        Box::new(matmul + Pattern::const_symbol("bias"))
    }

    fn maybe_fuse(
        &self,
        state: &dyn Any,
        block: &Block,
        _op_node_id: NodeId,
        op_node: &OperatorNode,
    ) -> Option<Fusion> {
        let pattern: &Pattern = state.downcast_ref()?;
        let output_id = *op_node.output_ids().first()?;
        let pat_match = pattern.test(output_id, block)?;

        let x_id = pat_match.node_id("x")?;
        let w_id = pat_match.node_id("w")?;
        let bias_id = pat_match.node_id("bias")?;
        let transpose_y = pat_match
            .operator("matmul", block)?
            .attr("transpose_y")
            .and_then(|attr| attr.as_bool())
            .unwrap_or(false);

        let w = pat_match.constant("w", block)?;
        if w.ndim() != 2 {
            return None;
        }
        let (weight, out_features) = if transpose_y {
            (FusionInput::Value(w_id), w.shape()[0])
        } else {
            (FusionInput::Constant(w.permute(&[1, 0])), w.shape()[1])
        };

        // The bias must broadcast along the last axis only.
        let bias = pat_match.constant("bias", block)?;
        if bias.len() != out_features
            || bias.shape().last() != Some(&out_features)
            || bias.shape().iter().rev().skip(1).any(|d| *d != 1)
        {
            return None;
        }
        let bias = if bias.ndim() == 1 {
            FusionInput::Value(bias_id)
        } else {
            FusionInput::Constant(bias.reshape(&[out_features])?)
        };

        Some(Fusion {
            kind: "linear",
            inputs: vec![
                ("x", FusionInput::Value(x_id)),
                ("weight", weight),
                ("bias", bias),
            ],
            attrs: BTreeMap::new(),
            output_ids: vec![output_id],
        })
    }
}

/// Fuses `act(linear(x, W, b))` into `fused_linear(x, W, b)` with the
/// activation recorded in its `activation` attribute.
struct LinearActivationFusion {}

impl FusionVisitor for LinearActivationFusion {
    fn prepare(&self, _: &Block) -> Box<dyn Any> {
        let linear = |with_bias: bool| {
            let mut inputs = vec![
                ("x", Pattern::symbol("x")),
                ("weight", Pattern::const_symbol("weight")),
            ];
            if with_bias {
                inputs.push(("bias", Pattern::const_symbol("bias")));
            }
            Pattern::op("linear", inputs)
        };
        let patterns: Vec<(&'static str, Pattern)> = FUSED_ACTIVATIONS
            .iter()
            .flat_map(|&act| [true, false].map(|bias| (act, Pattern::unary_op(act, linear(bias)))))
            .collect();
        Box::new(patterns)
    }

    fn maybe_fuse(
        &self,
        state: &dyn Any,
        block: &Block,
        _op_node_id: NodeId,
        op_node: &OperatorNode,
    ) -> Option<Fusion> {
        let patterns: &Vec<(&'static str, Pattern)> = state.downcast_ref()?;
        let output_id = *op_node.output_ids().first()?;
        let (activation, pat_match) = patterns
            .iter()
            .filter(|(act, _)| *act == op_node.kind())
            .find_map(|(act, pattern)| pattern.test(output_id, block).map(|m| (*act, m)))?;

        let mut inputs = vec![
            ("x", FusionInput::Value(pat_match.node_id("x")?)),
            ("weight", FusionInput::Value(pat_match.node_id("weight")?)),
        ];
        if let Some(bias_id) = pat_match.node_id("bias") {
            inputs.push(("bias", FusionInput::Value(bias_id)));
        }

        Some(Fusion {
            kind: "fused_linear",
            inputs,
            attrs: [("activation", Attr::from(activation))].into(),
            output_ids: vec![output_id],
        })
    }
}

/// Replace common subgraphs with fused ops: `gelu`, `silu`, `linear` and
/// `fused_linear`.
///
/// Does nothing if fusion is disabled in the options.
pub struct FuseOps {}

impl BlockPass for FuseOps {
    fn name(&self) -> &'static str {
        "fuse_ops"
    }

    fn rewrite(&self, block: Block, ctx: &PassContext) -> Result<Block, OptimizeError> {
        if !ctx.options().fusion {
            return Ok(block);
        }

        let silu = SiluFusion {}.into_visitor();
        let gelu = GeluFusion {}.into_visitor();
        let linear = LinearFusion {};
        let linear_activation = LinearActivationFusion {};

        // The ordering is significant as fusions are tried in turn until a
        // match is found. Ops are visited in order, so a `linear` fused from
        // a matmul and add can then absorb the activation that follows it.
        let visitors: [&dyn FusionVisitor; 4] = [&silu, &gelu, &linear, &linear_activation];

        let mut block = GraphMutator::from_block(block);

        // Create the prepared state once and then re-use it for each
        // operator visited.
        let states: Vec<Box<dyn Any>> = visitors.iter().map(|v| v.prepare(block.block())).collect();

        for op_id in block.block().op_order().to_vec() {
            let Some(op) = block.block().node(op_id).and_then(|n| n.as_operator()) else {
                continue;
            };
            let fusion = visitors
                .iter()
                .zip(&states)
                .find_map(|(visitor, state)| {
                    visitor.maybe_fuse(state.as_ref(), block.block(), op_id, op)
                });
            if let Some(fusion) = fusion {
                block.apply_fusion(op_id, fusion, ctx);
            }
        }

        Ok(block.into_block())
    }
}
