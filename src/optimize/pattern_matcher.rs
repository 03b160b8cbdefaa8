use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::graph::{Block, Node, NodeId, OperatorNode};
use crate::value::Tensor;

/// Absolute tolerance for matching float constants against fill patterns.
const FILL_TOLERANCE: f64 = 1e-4;

/// Constants with more elements than this never match a fill pattern.
const MAX_FILL_LEN: usize = 4096;

/// Names bound to nodes while matching.
///
/// Bindings are only appended. Backtracking undoes the bindings made since
/// a saved length by truncating.
#[derive(Default)]
struct Bindings(Vec<(&'static str, NodeId)>);

impl Bindings {
    fn get(&self, name: &str) -> Option<NodeId> {
        self.0
            .iter()
            .find(|(bound, _)| *bound == name)
            .map(|(_, id)| *id)
    }

    /// Bind `name` to `id`. Fails if `name` is already bound to another node.
    fn bind(&mut self, name: &'static str, id: NodeId) -> bool {
        match self.get(name) {
            Some(bound) => bound == id,
            None => {
                self.0.push((name, id));
                true
            }
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

/// The result of matching a [`Pattern`] against a value in a block.
pub struct Match {
    bindings: Bindings,
}

impl Match {
    /// Return the node that a symbol or named operator pattern matched.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.bindings.get(name)
    }

    /// Return the value of the constant matched by a symbol.
    pub fn constant<'a>(&self, name: &str, block: &'a Block) -> Option<&'a Tensor> {
        block.constant(self.node_id(name)?)
    }

    /// Return the operator matched by a named operator pattern.
    pub fn operator<'a>(&self, name: &str, block: &'a Block) -> Option<&'a OperatorNode> {
        block.node(self.node_id(name)?)?.as_operator()
    }
}

/// Matches an operator by kind, attributes and named inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct OpPattern {
    kind: &'static str,

    /// Patterns for each input, keyed by the input's name in the op
    /// signature. The operator must have no other inputs.
    inputs: Vec<(&'static str, Pattern)>,

    /// Bool attributes and the value they must have. A missing attribute is
    /// treated as false.
    flags: Vec<(&'static str, bool)>,

    /// Name which the matched operator is bound to.
    name: Option<&'static str>,
}

impl OpPattern {
    fn matches(&self, op: &OperatorNode, block: &Block, bindings: &mut Bindings) -> bool {
        if op.kind() != self.kind
            || !op.blocks().is_empty()
            || op.inputs().len() != self.inputs.len()
        {
            return false;
        }
        let flags_match = self.flags.iter().all(|(name, expected)| {
            let value = op.attr(name).and_then(|attr| attr.as_bool()).unwrap_or(false);
            value == *expected
        });
        if !flags_match {
            return false;
        }

        let start = bindings.len();
        if self.match_inputs(op, block, bindings, false) {
            return true;
        }
        bindings.truncate(start);

        // Operands of commutative ops may appear in either order.
        if op.operator().is_commutative() && self.inputs.len() == 2 {
            if self.match_inputs(op, block, bindings, true) {
                return true;
            }
            bindings.truncate(start);
        }
        false
    }

    fn match_inputs(
        &self,
        op: &OperatorNode,
        block: &Block,
        bindings: &mut Bindings,
        swap: bool,
    ) -> bool {
        self.inputs.iter().enumerate().all(|(i, (param, pattern))| {
            let param = if swap { self.inputs[1 - i].0 } else { *param };
            op.input(param)
                .is_some_and(|id| pattern.test_impl(id, block, bindings))
        })
    }
}

/// Pattern for a subgraph of a [`Block`], matched against the value the
/// subgraph produces.
///
/// Patterns are built from operators, float fills and symbols, and can be
/// combined with arithmetic operators. For example
/// `Pattern::fill(1.0) + Pattern::symbol("x")` describes an `add` of the
/// constant `1.0` and any value `x`.
///
/// When matching an operator, `identity` ops and reshapes which don't
/// change the type of their input are looked through.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Op(OpPattern),

    /// A float constant whose elements all equal this value.
    Fill(f32),

    /// Any value, bound to a name. All uses of a name in a pattern must
    /// match the same node.
    Symbol {
        name: &'static str,
        const_only: bool,
    },
}

impl Pattern {
    /// Create a pattern for an operator whose inputs match `inputs`.
    pub fn op(
        kind: &'static str,
        inputs: impl IntoIterator<Item = (&'static str, Pattern)>,
    ) -> Pattern {
        Pattern::Op(OpPattern {
            kind,
            inputs: inputs.into_iter().collect(),
            flags: Vec::new(),
            name: None,
        })
    }

    /// Create a pattern for an operator with a single input `x`.
    pub fn unary_op(kind: &'static str, x: impl Into<Pattern>) -> Pattern {
        Pattern::op(kind, [("x", x.into())])
    }

    /// Create a pattern for an operator with inputs `x` and `y`.
    pub fn binary_op(kind: &'static str, x: impl Into<Pattern>, y: impl Into<Pattern>) -> Pattern {
        Pattern::op(kind, [("x", x.into()), ("y", y.into())])
    }

    /// Bind the operator matched by this pattern to `name`, so it can be
    /// looked up with [`Match::node_id`] or [`Match::operator`].
    ///
    /// This has no effect on fill or symbol patterns.
    pub fn named(mut self, name: &'static str) -> Pattern {
        if let Pattern::Op(op) = &mut self {
            op.name = Some(name);
        }
        self
    }

    /// Require the bool attribute `name` of the operator to equal `value`.
    pub fn with_flag(mut self, name: &'static str, value: bool) -> Pattern {
        if let Pattern::Op(op) = &mut self {
            op.flags.push((name, value));
        }
        self
    }

    /// Create a pattern that matches a float constant filled with `value`.
    pub fn fill(value: f32) -> Pattern {
        Pattern::Fill(value)
    }

    /// Create a pattern that matches any value or constant.
    pub fn symbol(name: &'static str) -> Pattern {
        Pattern::Symbol {
            name,
            const_only: false,
        }
    }

    /// Create a pattern that matches any constant.
    pub fn const_symbol(name: &'static str) -> Pattern {
        Pattern::Symbol {
            name,
            const_only: true,
        }
    }

    /// Test whether the subgraph of `block` which produces `value_id`
    /// matches this pattern.
    pub fn test(&self, value_id: NodeId, block: &Block) -> Option<Match> {
        let mut bindings = Bindings::default();
        self.test_impl(value_id, block, &mut bindings)
            .then_some(Match { bindings })
    }

    fn test_impl(&self, node_id: NodeId, block: &Block, bindings: &mut Bindings) -> bool {
        let Some(node) = block.node(node_id) else {
            return false;
        };

        match (self, node) {
            (Pattern::Op(op_pat), Node::Value(_)) => {
                let value_id = skip_passthrough(block, node_id);
                let Some(op_id) = block.producer(value_id) else {
                    return false;
                };
                let Some(op) = block.node(op_id).and_then(|n| n.as_operator()) else {
                    return false;
                };
                op_pat.matches(op, block, bindings)
                    && op_pat.name.map_or(true, |name| bindings.bind(name, op_id))
            }
            (Pattern::Fill(value), Node::Constant(constant)) => is_fill(constant.value(), *value),
            (Pattern::Symbol { name, const_only }, _) => {
                if *const_only && !matches!(node, Node::Constant(_)) {
                    return false;
                }
                !matches!(node, Node::Operator(_)) && bindings.bind(*name, node_id)
            }
            _ => false,
        }
    }
}

/// Return true if `value` is a non-empty float tensor whose elements are
/// all `fill`.
fn is_fill(value: &Tensor, fill: f32) -> bool {
    if !value.dtype().is_float() || value.len() == 0 || value.len() > MAX_FILL_LEN {
        return false;
    }
    value.to_f64_array().is_some_and(|array| {
        array
            .iter()
            .all(|x| (x - fill as f64).abs() <= FILL_TOLERANCE)
    })
}

/// Follow a value back through `identity` ops and reshapes which leave the
/// type unchanged.
fn skip_passthrough(block: &Block, mut value_id: NodeId) -> NodeId {
    while let Some(op) = block.producer_op(value_id) {
        let Some(input_id) = op.input("x") else {
            break;
        };
        let passthrough = match op.kind() {
            "identity" => true,
            "reshape" => block.value_type(input_id) == block.value_type(value_id),
            _ => false,
        };
        if !passthrough {
            break;
        }
        value_id = input_id;
    }
    value_id
}

impl From<f32> for Pattern {
    fn from(val: f32) -> Pattern {
        Pattern::fill(val)
    }
}

macro_rules! impl_binop_for_pattern {
    ($trait:ident, $method:ident, $kind:expr) => {
        impl<I: Into<Pattern>> $trait<I> for Pattern {
            type Output = Pattern;

            fn $method(self, rhs: I) -> Pattern {
                Pattern::binary_op($kind, self, rhs)
            }
        }

        impl $trait<Pattern> for f32 {
            type Output = Pattern;

            fn $method(self, rhs: Pattern) -> Pattern {
                Pattern::binary_op($kind, self, rhs)
            }
        }
    };
}
impl_binop_for_pattern!(Add, add, "add");
impl_binop_for_pattern!(Mul, mul, "mul");
impl_binop_for_pattern!(Div, div, "real_div");
impl_binop_for_pattern!(Sub, sub, "sub");

impl Neg for Pattern {
    type Output = Pattern;

    fn neg(self) -> Pattern {
        Pattern::unary_op("neg", self)
    }
}

#[cfg(test)]
mod tests {
    use milc_testing::TestCases;

    use super::Pattern;
    use crate::graph::builder::Expr;
    use crate::graph::Block;
    use crate::types::{DataType, TensorType};
    use crate::value::{Attr, Tensor};

    fn f32_value(name: &str, shape: &[usize]) -> Expr {
        Expr::value(name, TensorType::fixed(DataType::Float32, shape))
    }

    /// Create a block that computes softsign, `x / (1 + |x|)`.
    fn softsign_block() -> Block {
        let x = f32_value("x", &[4]);
        let expr = x.clone() / (Expr::constant(1.0f32) + x.unary("abs"));
        expr.build_block(&[x])
    }

    #[test]
    fn test_pattern_match() {
        #[derive(Debug)]
        struct Case {
            pattern: Pattern,
            expect_match: bool,
        }

        let x = Pattern::symbol("x");
        let c = Pattern::const_symbol("c");
        let abs = |p: Pattern| Pattern::unary_op("abs", p);

        let cases = [
            Case {
                pattern: x.clone() / (1.0 + abs(x.clone())),
                expect_match: true,
            },
            Case {
                pattern: x.clone() / (c.clone() + abs(x.clone())),
                expect_match: true,
            },
            // `real_div` is not commutative.
            Case {
                pattern: (1.0 + abs(x.clone())) / x.clone(),
                expect_match: false,
            },
            // `add` is.
            Case {
                pattern: x.clone() / (abs(x.clone()) + 1.0),
                expect_match: true,
            },
            Case {
                pattern: x.clone() / (1.0 - abs(x.clone())),
                expect_match: false,
            },
            Case {
                pattern: x.clone() / (1.1 + abs(x.clone())),
                expect_match: false,
            },
            Case {
                pattern: x.clone() / (1.00001 + abs(x.clone())),
                expect_match: true,
            },
            // `x` can't match two different nodes.
            Case {
                pattern: x.clone() / (x.clone() + abs(x.clone())),
                expect_match: false,
            },
            // The numerator is a runtime value.
            Case {
                pattern: c.clone() / (1.0 + abs(x.clone())),
                expect_match: false,
            },
            // Inputs are matched by name, so a pattern with an input the op
            // doesn't have fails.
            Case {
                pattern: x.clone() / (1.0 + Pattern::op("abs", [("y", x.clone())])),
                expect_match: false,
            },
        ];

        cases.test_each(|case| {
            let block = softsign_block();
            let pat_match = case.pattern.test(block.output_ids()[0], &block);
            assert_eq!(pat_match.is_some(), case.expect_match);
            if let Some(pat_match) = pat_match {
                assert_eq!(pat_match.node_id("x"), Some(block.input_ids()[0]));
            }
        })
    }

    #[test]
    fn test_named_operator_and_constants() {
        let x = f32_value("x", &[2, 3]);
        let w = Tensor::from_vec(&[3, 2], vec![1.0f32; 6]).unwrap();
        let expr = x.apply(
            "matmul",
            &[("y", Expr::constant(w.clone()))],
            &[("transpose_y", Attr::from(false))],
        );
        let block = expr.build_block(&[x]);
        let output = block.output_ids()[0];

        let matmul = |transpose_x: bool| {
            Pattern::binary_op("matmul", Pattern::symbol("x"), Pattern::const_symbol("w"))
                .with_flag("transpose_x", transpose_x)
                .named("matmul")
        };

        let pat_match = matmul(false).test(output, &block).unwrap();
        assert_eq!(pat_match.constant("w", &block), Some(&w));
        let op = pat_match.operator("matmul", &block).unwrap();
        assert_eq!(op.kind(), "matmul");

        // A missing flag is false.
        assert!(matmul(true).test(output, &block).is_none());
    }

    #[test]
    fn test_fill_matches_broadcast_constant() {
        let x = f32_value("x", &[2, 4]);
        let half = Tensor::from_vec(&[1, 4], vec![0.5f32; 4]).unwrap();
        let block = (x.clone() * Expr::constant(half)).build_block(&[x]);
        let output = block.output_ids()[0];

        assert!((Pattern::symbol("x") * 0.5).test(output, &block).is_some());
        assert!((Pattern::symbol("x") * 0.25).test(output, &block).is_none());
    }

    #[test]
    fn test_match_skips_identity() {
        let x = f32_value("x", &[4]);
        let expr = (x.clone() * x.unary("sigmoid").unary("identity")).unary("identity");
        let block = expr.build_block(&[x]);

        let pat = Pattern::symbol("x") * Pattern::unary_op("sigmoid", Pattern::symbol("x"));
        assert!(pat.test(block.output_ids()[0], &block).is_some());
    }
}
