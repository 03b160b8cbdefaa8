//! Tools to simplify building blocks in tests.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

use crate::graph::Block;
use crate::program::{OpCall, ProgramBuilder, Var};
use crate::target::TargetVersion;
use crate::types::TensorType;
use crate::value::{Attr, Tensor};

enum ExprKind {
    /// A named runtime value: a block input or a value captured from an
    /// enclosing block.
    Value(ValueExpr),
    Constant(Tensor),
    Operator(OperatorExpr),
    /// A specific output of an operator.
    OperatorOutput(OperatorOutputExpr),
}

/// An expression describing the contents of a [`Block`].
///
/// Expressions are constructed using constructor methods and math operators.
/// They are then converted into a block using [`Expr::build_block`].
///
/// The following builds a block for the GELU activation function,
/// `x * 0.5 * (1 + erf(x / sqrt(2)))`:
///
/// ```text
/// let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[4]));
/// let expr = x.clone() * 0.5 * ((x.clone() / 2f32.sqrt()).unary("erf") + 1.0);
/// let block = expr.build_block(&[x]);
/// ```
#[derive(Clone)]
pub struct Expr {
    kind: Rc<ExprKind>,
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Expr {
        Expr { kind: kind.into() }
    }
}

impl Expr {
    /// Create an expression representing a named runtime value.
    pub fn value(name: &str, ty: TensorType) -> Expr {
        Expr::from(ExprKind::Value(ValueExpr {
            name: name.to_string(),
            ty,
        }))
    }

    /// Create an expression representing a constant value.
    pub fn constant<V>(value: V) -> Expr
    where
        V: Into<Tensor>,
    {
        Expr::from(ExprKind::Constant(value.into()))
    }

    /// Apply a unary op, binding this expression to its `x` input.
    pub fn unary(&self, kind: &'static str) -> Expr {
        self.apply(kind, &[], &[])
    }

    /// Apply a binary op, binding this expression and `rhs` to its `x` and
    /// `y` inputs.
    pub fn binary(&self, kind: &'static str, rhs: Expr) -> Expr {
        self.apply(kind, &[("y", rhs)], &[])
    }

    /// Apply an op, binding this expression to its `x` input.
    pub fn apply(
        &self,
        kind: &'static str,
        operands: &[(&'static str, Expr)],
        attrs: &[(&'static str, Attr)],
    ) -> Expr {
        let mut inputs = vec![("x", self.clone())];
        inputs.extend(operands.iter().cloned());
        Expr::from(ExprKind::Operator(OperatorExpr {
            kind,
            inputs,
            attrs: attrs.to_vec(),
        }))
    }

    /// Create an expression which refers to the index'th output of the `self`
    /// operator expression.
    pub fn output(&self, index: usize) -> Expr {
        assert!(
            matches!(self.kind.as_ref(), ExprKind::Operator(_)),
            "can only call `output` on an operator expression"
        );
        Expr::from(ExprKind::OperatorOutput(OperatorOutputExpr {
            op: self.clone(),
            output_index: index,
        }))
    }

    /// Convert this expression into a block with the given inputs and a
    /// single output.
    pub fn build_block(&self, inputs: &[Expr]) -> Block {
        Self::make_block(inputs, std::slice::from_ref(self))
    }

    /// Create a block with the given inputs and outputs.
    pub fn make_block(inputs: &[Expr], outputs: &[Expr]) -> Block {
        let mut pb = ProgramBuilder::new(TargetVersion::Ios18);
        let input_types: Vec<(&str, TensorType)> = inputs
            .iter()
            .map(|input| match input.kind.as_ref() {
                ExprKind::Value(value) => (value.name.as_str(), value.ty.clone()),
                _ => panic!("block inputs must be value expressions"),
            })
            .collect();
        let handle = pb.begin_block(&input_types).expect("invalid block inputs");

        let mut expr_vars = HashMap::new();
        let output_vars: Vec<Var> = outputs
            .iter()
            .flat_map(|output| output.add_to_builder(&mut pb, &mut expr_vars))
            .collect();

        pb.end_block(handle, &output_vars)
            .expect("failed to close block")
    }

    /// Add this expression to the innermost open block of `pb`.
    pub fn build_in(&self, pb: &mut ProgramBuilder) -> Var {
        let mut outputs = self.add_to_builder(pb, &mut HashMap::new());
        assert_eq!(outputs.len(), 1, "expression should have one output");
        outputs.remove(0)
    }

    fn add_to_builder(
        &self,
        pb: &mut ProgramBuilder,
        expr_vars: &mut HashMap<ExprRef, Vec<Var>>,
    ) -> Vec<Var> {
        if let Some(vars) = expr_vars.get(&ExprRef(self.clone())) {
            return vars.clone();
        }

        let vars = match self.kind.as_ref() {
            ExprKind::Value(value) => vec![Var::new(&value.name, value.ty.clone())],
            ExprKind::Constant(value) => {
                vec![pb.add_const(value.clone()).expect("failed to add constant")]
            }
            ExprKind::Operator(op) => {
                let mut call = OpCall::new(op.kind);
                for (param, input) in &op.inputs {
                    for var in input.add_to_builder(pb, expr_vars) {
                        call = call.input(param, &var);
                    }
                }
                for (name, value) in &op.attrs {
                    call = call.attr(name, value.clone());
                }
                pb.add_op(call)
                    .unwrap_or_else(|err| panic!("failed to add {}: {}", op.kind, err))
            }
            ExprKind::OperatorOutput(output) => {
                let vars = output.op.add_to_builder(pb, expr_vars);
                vec![vars[output.output_index].clone()]
            }
        };
        expr_vars.insert(ExprRef(self.clone()), vars.clone());

        vars
    }
}

/// Wrapper around an `Expr` which uses reference-equality.
struct ExprRef(Expr);

impl PartialEq for ExprRef {
    fn eq(&self, other: &ExprRef) -> bool {
        Rc::ptr_eq(&self.0.kind, &other.0.kind)
    }
}

impl Eq for ExprRef {}

impl Hash for ExprRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0.kind).hash(state)
    }
}

struct OperatorExpr {
    kind: &'static str,
    inputs: Vec<(&'static str, Expr)>,
    attrs: Vec<(&'static str, Attr)>,
}

struct ValueExpr {
    name: String,
    ty: TensorType,
}

struct OperatorOutputExpr {
    op: Expr,
    output_index: usize,
}

macro_rules! impl_binary_op {
    ($op_trait:ident, $op_method:ident, $kind:literal) => {
        impl $op_trait for Expr {
            type Output = Expr;

            fn $op_method(self, rhs: Expr) -> Expr {
                self.binary($kind, rhs)
            }
        }

        impl<V> $op_trait<V> for Expr
        where
            V: Into<Tensor>,
        {
            type Output = Expr;

            fn $op_method(self, rhs: V) -> Expr {
                self.binary($kind, Expr::constant(rhs))
            }
        }

        impl $op_trait<Expr> for f32 {
            type Output = Expr;

            fn $op_method(self, rhs: Expr) -> Expr {
                Expr::constant(self).binary($kind, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, "add");
impl_binary_op!(Mul, mul, "mul");
impl_binary_op!(Div, div, "real_div");
impl_binary_op!(Sub, sub, "sub");

#[cfg(test)]
mod tests {
    use super::Expr;
    use crate::types::{DataType, TensorType};

    #[test]
    fn test_build_block() {
        // Build expression featuring values, operators and constants,
        // including re-use of the same expression (`x_sqr`).
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[3]));
        let x_sqr = x.clone() * x.clone();
        let expr = x_sqr.clone() * x_sqr.clone() + 2.0f32;
        let block = expr.build_block(&[x]);

        let counts = block.op_counts();
        assert_eq!(counts.get("mul"), Some(&2));
        assert_eq!(counts.get("add"), Some(&1));
        assert_eq!(counts.get("const"), Some(&1));
        assert_eq!(block.signature().outputs[0].ty, TensorType::fixed(DataType::Float32, &[3]));
        assert!(block.check_invariants().is_ok());
    }
}
