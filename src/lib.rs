//! milc is a compiler core for converting neural network models into a
//! typed dataflow program for an on-device inference runtime.
//!
//! # Building programs
//!
//! Programs are constructed with a [`ProgramBuilder`]. Each operation added to
//! a block is validated against the schema of its operator and the target
//! version, and the types of its outputs are inferred from its inputs.
//! Invalid operations are rejected when they are added rather than when the
//! program is optimized or serialized.
//!
//! # Optimizing
//!
//! [`GraphOptimizer`] runs a pipeline of passes over each function in a
//! program. The default pipeline folds constants, eliminates common
//! subexpressions, removes redundant operations, fuses activation patterns
//! (eg. GELU, SiLU) and removes dead code. Passes can optionally lower
//! floating point computations to fp16 for targets that support it.
//!
//! # Serializing
//!
//! [`serialize_program`] writes a program into a container with a fixed-size
//! header followed by a protobuf payload. [`Model::load`] reads the container
//! back and rebuilds the program, re-running type inference to check that
//! the recorded types match.
//!
//! A [`Manifest`] summarizes the interface of each function as JSON.

#[macro_use]
mod types;

mod env;
mod graph;
mod manifest;
mod model;
mod model_builder;
mod op_registry;
mod operator;
mod optimize;
mod program;
mod target;
mod value;

/// Operator kinds which can be used in programs.
pub mod ops;

pub use graph::{
    Block, BlockSignature, ConstantNode, NamedType, Node, NodeId, OpInput, OperatorNode, ScopeEnv,
    ValueNode,
};
pub use manifest::{
    DimManifest, FlexibleShapeManifest, FunctionManifest, Manifest, RangeManifest, ValueManifest,
};
pub use model::{LoadErrorKind, Model, ModelLoadError};
pub use model_builder::{serialize_program, ModelBuilder};
pub use op_registry::{OpRef, OpRegistry};
pub use operator::{
    AttrSpec, BlockInterface, DefaultValue, InferContext, InferError, InferErrorKind, InferInput,
    InputSpec, OpSignature, SchemaError, ValueInference,
};
pub use optimize::{
    default_pipeline, BlockPass, CommonSubexpressionElimination, ConstantFolding,
    DeadCodeElimination, DiagnosticLevel, Diagnostics, Fp16Precision, FuseOps, GraphOptimizer,
    OptimizeError, OptimizeOptions, ParseLevelError, PassContext, Precision, PrecisionRule,
    PrecisionTable, RemoveRedundantOps,
};
pub use program::{
    BlockHandle, BuildError, BuildErrorKind, FlexibleShape, Function, OpCall, Program,
    ProgramBuilder, RangeDim, Var,
};
pub use target::{TargetVersion, UnknownTarget};
pub use types::{
    broadcast_shapes, resolve_axis, BroadcastError, DataType, Dimension, ShapeDisplay, TensorType,
};
pub use value::{ArcTensor, Attr, AttrKind, Tensor, TensorElement};
