use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::ops;
use crate::ops::Operator;

/// Shared handle to an op kind.
pub type OpRef = Arc<dyn Operator + Send + Sync>;

/// Catalog of op kinds, keyed by name.
///
/// New registries have no ops registered. To create a registry with all
/// built-in ops, use [`OpRegistry::with_all_ops`], or share the process-wide
/// instance returned by [`OpRegistry::global`]. A registry is read-only once
/// it is shared with a builder.
#[derive(Default)]
pub struct OpRegistry {
    ops: FxHashMap<&'static str, OpRef>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry {
            ops: FxHashMap::default(),
        }
    }

    /// Register the built-in implementation of an op kind.
    ///
    /// ```
    /// use milc::ops::{Add, Relu};
    /// use milc::OpRegistry;
    ///
    /// let mut reg = OpRegistry::new();
    /// reg.register_op::<Add>();
    /// reg.register_op::<Relu>();
    /// assert!(reg.get("add").is_some());
    /// assert!(reg.get("matmul").is_none());
    /// ```
    pub fn register_op<Op: Operator + Default + Send + Sync + 'static>(&mut self) {
        let op = Op::default();
        self.ops.insert(op.name(), Arc::new(op));
    }

    /// Look up an op kind by name.
    pub fn get(&self, name: &str) -> Option<&OpRef> {
        self.ops.get(name)
    }

    /// Return the names of registered op kinds, in sorted order.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.ops.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Create a new registry with all built-in op kinds registered.
    pub fn with_all_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();

        macro_rules! register_op {
            ($op:ident) => {
                reg.register_op::<ops::$op>()
            };
        }

        register_op!(Abs);
        register_op!(Add);
        register_op!(Cast);
        register_op!(Concat);
        register_op!(Cond);
        register_op!(Const);
        register_op!(Elu);
        register_op!(Equal);
        register_op!(Erf);
        register_op!(Exp);
        register_op!(ExpandDims);
        register_op!(FusedLinear);
        register_op!(Gather);
        register_op!(Gelu);
        register_op!(Greater);
        register_op!(Identity);
        register_op!(LeakyRelu);
        register_op!(Less);
        register_op!(Linear);
        register_op!(LinearActivation);
        register_op!(Log);
        register_op!(MatMul);
        register_op!(Maximum);
        register_op!(Minimum);
        register_op!(Mul);
        register_op!(Neg);
        register_op!(Pow);
        register_op!(RealDiv);
        register_op!(ReduceMax);
        register_op!(ReduceMean);
        register_op!(ReduceSum);
        register_op!(Relu);
        register_op!(Reshape);
        register_op!(ScaledDotProductAttention);
        register_op!(Sigmoid);
        register_op!(Silu);
        register_op!(Sqrt);
        register_op!(Squeeze);
        register_op!(Sub);
        register_op!(Tanh);
        register_op!(Transpose);
        register_op!(WhileLoop);

        reg
    }

    /// Return the process-wide registry with all built-in ops.
    ///
    /// This is created on first use.
    pub fn global() -> Arc<OpRegistry> {
        static REGISTRY: OnceLock<Arc<OpRegistry>> = OnceLock::new();
        REGISTRY
            .get_or_init(|| Arc::new(OpRegistry::with_all_ops()))
            .clone()
    }
}
