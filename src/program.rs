//! Programs and the builder used to assemble them.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::graph::{unique_name, Block, NodeId, OpInput, OperatorNode};
use crate::op_registry::OpRegistry;
use crate::operator::{
    BlockInterface, InferContext, InferError, InferErrorKind, InferInput, SchemaError,
};
use crate::target::TargetVersion;
use crate::types::{Dimension, TensorType};
use crate::value::{Attr, Tensor};

/// Handle to a named, typed value created by a [`ProgramBuilder`].
#[derive(Clone, Debug, PartialEq)]
pub struct Var {
    name: String,
    ty: TensorType,
}

impl Var {
    pub(crate) fn new(name: &str, ty: TensorType) -> Var {
        Var {
            name: name.to_string(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }
}

/// Handle to the block most recently opened by
/// [`ProgramBuilder::begin_block`].
#[derive(Debug)]
pub struct BlockHandle {
    depth: usize,
    inputs: Vec<Var>,
}

impl BlockHandle {
    /// Return the block's input parameters.
    pub fn inputs(&self) -> &[Var] {
        &self.inputs
    }

    /// Return the input parameter at `index`, or `None` if out of range.
    pub fn input(&self, index: usize) -> Option<&Var> {
        self.inputs.get(index)
    }
}

/// Request to add an operation to the open block.
///
/// ```
/// use milc::{OpCall, ProgramBuilder, TargetVersion, TensorType, DataType};
///
/// let mut pb = ProgramBuilder::new(TargetVersion::Ios17);
/// let block = pb.begin_block(&[("x", TensorType::fixed(DataType::Float32, &[2, 3]))]).unwrap();
/// let x = block.input(0).unwrap().clone();
/// let y = pb
///     .add_op(OpCall::new("transpose").input("x", &x).attr("perm", [1i64, 0]))
///     .unwrap();
/// assert_eq!(y[0].ty(), &TensorType::fixed(DataType::Float32, &[3, 2]));
/// ```
#[derive(Clone, Debug)]
pub struct OpCall {
    kind: String,

    /// (param, value name) pairs in the order they were bound.
    inputs: Vec<(String, String)>,
    attrs: Vec<(String, Attr)>,
    output_names: Option<Vec<String>>,
    blocks: Vec<Block>,
}

impl OpCall {
    pub fn new(kind: &str) -> OpCall {
        OpCall {
            kind: kind.to_string(),
            inputs: Vec::new(),
            attrs: Vec::new(),
            output_names: None,
            blocks: Vec::new(),
        }
    }

    /// Bind a value to an input.
    pub fn input(self, param: &str, value: &Var) -> OpCall {
        self.input_name(param, value.name())
    }

    /// Bind a value to an input by name.
    pub fn input_name(mut self, param: &str, name: &str) -> OpCall {
        self.inputs.push((param.to_string(), name.to_string()));
        self
    }

    /// Bind a list of values to a variadic input.
    pub fn inputs<'a>(mut self, param: &str, values: impl IntoIterator<Item = &'a Var>) -> OpCall {
        for value in values {
            self = self.input(param, value);
        }
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<Attr>) -> OpCall {
        self.attrs.push((name.to_string(), value.into()));
        self
    }

    /// Set the names of the operation's outputs. If not set, unique names
    /// are generated from the op kind.
    pub fn output_names(mut self, names: &[&str]) -> OpCall {
        self.output_names = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Add a nested block, for control flow ops.
    pub fn block(mut self, block: Block) -> OpCall {
        self.blocks.push(block);
        self
    }
}

/// Category of a [`BuildError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildErrorKind {
    Schema,
    Type,
    Shape,
    Name,
    State,
}

/// Errors when adding operations, blocks or functions to a program.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildError {
    /// No op kind with this name is registered.
    UnknownOp(String),

    /// The operation doesn't match its kind's signature.
    Schema {
        kind: String,
        name: Option<String>,
        error: SchemaError,
    },

    /// Type or shape inference failed.
    Infer {
        kind: String,
        name: Option<String>,
        error: InferError,
    },

    /// Explicit output names don't match the number of inferred outputs.
    OutputCount {
        kind: String,
        expected: usize,
        actual: usize,
    },

    /// A value name could not be resolved in the current block or any
    /// enclosing block.
    UnresolvedName(String),

    /// A name is already bound in the current scope.
    DuplicateName(String),

    /// A flexible input shape is invalid.
    InvalidInputShape { input: String, reason: String },

    /// An operation or block end was requested with no block open.
    NoOpenBlock,

    /// A block was closed while a nested block was still open.
    UnbalancedBlock,

    FunctionExists(String),
}

impl BuildError {
    pub fn kind(&self) -> BuildErrorKind {
        match self {
            BuildError::UnknownOp(_) | BuildError::Schema { .. } | BuildError::OutputCount { .. } => {
                BuildErrorKind::Schema
            }
            BuildError::Infer { error, .. } => match error.kind() {
                InferErrorKind::Type => BuildErrorKind::Type,
                InferErrorKind::Shape => BuildErrorKind::Shape,
            },
            BuildError::UnresolvedName(_) | BuildError::DuplicateName(_) => BuildErrorKind::Name,
            BuildError::InvalidInputShape { .. } => BuildErrorKind::Shape,
            BuildError::NoOpenBlock | BuildError::UnbalancedBlock | BuildError::FunctionExists(_) => {
                BuildErrorKind::State
            }
        }
    }
}

/// Format an op kind and optional name for error messages.
struct OpDesc<'a>(&'a str, &'a Option<String>);

impl Display for OpDesc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Some(name) => write!(f, "{} \"{}\"", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::UnknownOp(kind) => write!(f, "unknown op kind \"{}\"", kind),
            BuildError::Schema { kind, name, error } => {
                write!(f, "schema error in {}: {}", OpDesc(kind, name), error)
            }
            BuildError::Infer { kind, name, error } => {
                let category = match error.kind() {
                    InferErrorKind::Type => "type",
                    InferErrorKind::Shape => "shape",
                };
                write!(f, "{} error in {}: {}", category, OpDesc(kind, name), error)
            }
            BuildError::OutputCount {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{} has {} outputs but {} output names were given",
                kind, expected, actual
            ),
            BuildError::UnresolvedName(name) => write!(f, "name \"{}\" is not defined", name),
            BuildError::DuplicateName(name) => write!(f, "name \"{}\" is already defined", name),
            BuildError::InvalidInputShape { input, reason } => {
                write!(f, "invalid shape for input \"{}\": {}", input, reason)
            }
            BuildError::NoOpenBlock => write!(f, "no block is open"),
            BuildError::UnbalancedBlock => write!(f, "a nested block is still open"),
            BuildError::FunctionExists(name) => write!(f, "function \"{}\" already exists", name),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BuildError::Schema { error, .. } => Some(error),
            BuildError::Infer { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Range of sizes a symbolic input dimension may take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeDim {
    pub lower: usize,

    /// Upper bound, or `None` if unbounded.
    pub upper: Option<usize>,
    pub default: usize,
}

impl RangeDim {
    pub fn new(lower: usize, upper: Option<usize>, default: usize) -> RangeDim {
        RangeDim {
            lower,
            upper,
            default,
        }
    }
}

/// Flexible shape information for a function input with symbolic
/// dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlexibleShape {
    /// Size ranges for symbolic dimensions, keyed by dimension index.
    Ranges(BTreeMap<usize, RangeDim>),

    /// A list of concrete shapes the input may take.
    Enumerated {
        shapes: Vec<Vec<usize>>,
        default: usize,
    },
}

impl FlexibleShape {
    fn validate(&self, ty: &TensorType) -> Result<(), String> {
        match self {
            FlexibleShape::Ranges(ranges) => {
                for (&dim, range) in ranges {
                    match ty.shape().get(dim) {
                        Some(Dimension::Symbolic(_)) => {}
                        Some(Dimension::Fixed(_)) => {
                            return Err(format!("dimension {} is not symbolic", dim))
                        }
                        None => return Err(format!("dimension {} is out of range", dim)),
                    }
                    let upper_ok = range.upper.map_or(true, |upper| range.default <= upper);
                    if range.lower > range.default || !upper_ok {
                        return Err(format!(
                            "dimension {} requires lower <= default <= upper",
                            dim
                        ));
                    }
                }
                Ok(())
            }
            FlexibleShape::Enumerated { shapes, default } => {
                if *default >= shapes.len() {
                    return Err(format!(
                        "default index {} is out of range for {} shapes",
                        default,
                        shapes.len()
                    ));
                }
                for shape in shapes {
                    let matches = shape.len() == ty.rank()
                        && shape
                            .iter()
                            .zip(ty.shape())
                            .all(|(size, dim)| dim.as_fixed().map_or(true, |fixed| fixed == *size));
                    if !matches {
                        return Err(format!("shape {:?} does not match {}", shape, ty));
                    }
                }
                Ok(())
            }
        }
    }
}

/// A named top-level function: a root block plus declared input shapes.
#[derive(Clone, Debug)]
pub struct Function {
    block: Block,
    input_shapes: BTreeMap<String, FlexibleShape>,
}

impl Function {
    pub fn block(&self) -> &Block {
        &self.block
    }

    pub(crate) fn block_mut(&mut self) -> &mut Block {
        &mut self.block
    }

    pub fn input_shapes(&self) -> &BTreeMap<String, FlexibleShape> {
        &self.input_shapes
    }
}

/// The root container of a compiled model: named functions targeting a
/// runtime version.
#[derive(Clone, Debug)]
pub struct Program {
    target: TargetVersion,
    functions: BTreeMap<String, Function>,
}

impl Program {
    pub fn target(&self) -> TargetVersion {
        self.target
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Iterate over functions in name order.
    pub fn functions(&self) -> impl Iterator<Item = (&str, &Function)> {
        self.functions.iter().map(|(name, func)| (name.as_str(), func))
    }

    pub(crate) fn functions_mut(&mut self) -> impl Iterator<Item = (&str, &mut Function)> {
        self.functions
            .iter_mut()
            .map(|(name, func)| (name.as_str(), func))
    }

    /// Count operators by kind across all functions.
    pub fn op_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for func in self.functions.values() {
            for (kind, count) in func.block.op_counts() {
                *counts.entry(kind).or_insert(0) += count;
            }
        }
        counts
    }
}

/// How an input of an operation being added will be bound.
enum Binding {
    /// A node in the innermost block.
    Local(NodeId),

    /// A value defined in an enclosing block, captured by name.
    Capture(String),

    /// A constant in an enclosing block, copied into the innermost block.
    CopyConstant { name: String, value: Tensor },

    /// A declared default, added as a constant with a generated name.
    Default { prefix: String, value: Tensor },
}

/// An input of an operation which has been resolved but not yet bound.
struct StagedInput {
    param: &'static str,
    ty: TensorType,

    /// Value of the input, if it is a constant.
    value: Option<Tensor>,
    binding: Binding,
}

/// Assembles a [`Program`] from a sequence of op construction calls.
///
/// Blocks are opened with [`begin_block`](ProgramBuilder::begin_block) and
/// closed with [`end_block`](ProgramBuilder::end_block). Operations are
/// appended to the innermost open block. Each operation is validated against
/// its kind's signature and its output types are inferred immediately, so a
/// malformed operation is rejected when it is added.
///
/// Input names resolve in the innermost block first, then enclosing blocks.
/// A name that resolves in an enclosing block is captured by every block in
/// between.
pub struct ProgramBuilder {
    registry: Arc<OpRegistry>,
    target: TargetVersion,

    /// Open blocks, innermost last.
    stack: Vec<Block>,
    functions: BTreeMap<String, Function>,

    /// Counter for generated output names.
    next_id: usize,

    /// Names which generated names must avoid, in addition to names already
    /// bound.
    reserved: FxHashSet<String>,
}

impl ProgramBuilder {
    /// Create a builder that uses the global op registry.
    pub fn new(target: TargetVersion) -> ProgramBuilder {
        Self::with_registry(OpRegistry::global(), target)
    }

    pub fn with_registry(registry: Arc<OpRegistry>, target: TargetVersion) -> ProgramBuilder {
        ProgramBuilder {
            registry,
            target,
            stack: Vec::new(),
            functions: BTreeMap::new(),
            next_id: 0,
            reserved: FxHashSet::default(),
        }
    }

    pub fn target(&self) -> TargetVersion {
        self.target
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    /// Return true if `name` is bound in any open block, including nested
    /// blocks of its operations.
    fn is_used(&self, name: &str) -> bool {
        self.stack.iter().any(|block| block.uses_name(name))
    }

    fn check_new_name(&self, name: &str) -> Result<(), BuildError> {
        if self.is_used(name) {
            Err(BuildError::DuplicateName(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn generate_name(&mut self, prefix: &str) -> String {
        self.generate_name_excluding(prefix, &[])
    }

    /// Generate a name which is also distinct from `exclude`, which lists
    /// names about to be bound.
    fn generate_name_excluding(&mut self, prefix: &str, exclude: &[String]) -> String {
        let prefix = format!("{}_{}", prefix, self.next_id);
        self.next_id += 1;
        unique_name(&prefix, |name| {
            self.is_used(name)
                || self.reserved.contains(name)
                || exclude.iter().any(|n| n == name)
        })
    }

    /// Prevent generated names from using any of `names`.
    ///
    /// This is used when rebuilding a program whose names are known up
    /// front, so that constants added with generated names don't claim a
    /// name that a later operation declares explicitly.
    pub(crate) fn reserve_names(&mut self, names: impl IntoIterator<Item = String>) {
        self.reserved.extend(names);
    }

    fn top(&mut self) -> Result<&mut Block, BuildError> {
        self.stack.last_mut().ok_or(BuildError::NoOpenBlock)
    }

    /// Find the block which defines `name`, searching outwards from the
    /// innermost block. Returns the block's depth in the stack and the node.
    fn lookup(&self, name: &str) -> Result<(usize, NodeId), BuildError> {
        self.stack
            .iter()
            .enumerate()
            .rev()
            .find_map(|(level, block)| block.node_id(name).map(|id| (level, id)))
            .ok_or_else(|| BuildError::UnresolvedName(name.to_string()))
    }

    /// Resolve a name to a node in the innermost block, adding capture
    /// placeholders to blocks between the innermost block and the one where
    /// the name is defined.
    fn resolve(&mut self, name: &str) -> Result<NodeId, BuildError> {
        let unresolved = || BuildError::UnresolvedName(name.to_string());
        let (level, id) = self.lookup(name)?;
        if level == self.stack.len() - 1 {
            return Ok(id);
        }

        let ty = self.stack[level].value_type(id).ok_or_else(unresolved)?;
        let mut capture_id = id;
        for block in &mut self.stack[level + 1..] {
            capture_id = block.add_capture(name, ty.clone());
        }
        Ok(capture_id)
    }

    /// Find the constant which `name` refers to, skipping capture
    /// placeholders. Returns the block's depth in the stack and the value.
    fn lookup_constant(&self, name: &str) -> Option<(usize, Tensor)> {
        self.stack.iter().enumerate().rev().find_map(|(level, block)| {
            let id = block.node_id(name)?;
            if block.is_capture(id) {
                return None;
            }
            Some((level, block.constant(id)?.clone()))
        })
    }

    /// Bind a staged input to a node in the innermost block, adding any
    /// captures or constants it needs.
    fn commit_input(&mut self, binding: Binding, exclude: &[String]) -> Result<NodeId, BuildError> {
        match binding {
            Binding::Local(id) => Ok(id),
            Binding::Capture(name) => self.resolve(&name),
            Binding::CopyConstant { name, value } => {
                let copy_name = unique_name(&name, |n| {
                    self.is_used(n) || self.reserved.contains(n) || exclude.iter().any(|e| e == n)
                });
                Ok(self.top()?.add_constant(&copy_name, value))
            }
            Binding::Default { prefix, value } => {
                let name = self.generate_name_excluding(&prefix, exclude);
                Ok(self.top()?.add_constant(&name, value))
            }
        }
    }

    /// Open a new block with the given input parameters. The block becomes
    /// the target of subsequent [`add_op`](Self::add_op) calls.
    pub fn begin_block(&mut self, inputs: &[(&str, TensorType)]) -> Result<BlockHandle, BuildError> {
        let mut block = Block::new();
        let mut vars = Vec::with_capacity(inputs.len());
        for (name, ty) in inputs {
            if self.is_used(name) || block.node_id(name).is_some() {
                return Err(BuildError::DuplicateName(name.to_string()));
            }
            block.add_input(name, ty.clone());
            vars.push(Var {
                name: name.to_string(),
                ty: ty.clone(),
            });
        }
        self.stack.push(block);
        Ok(BlockHandle {
            depth: self.stack.len(),
            inputs: vars,
        })
    }

    /// Close the innermost block, declaring its outputs.
    pub fn end_block(&mut self, handle: BlockHandle, outputs: &[Var]) -> Result<Block, BuildError> {
        let outputs: Vec<(&str, &str)> = outputs
            .iter()
            .map(|output| (output.name(), output.name()))
            .collect();
        self.end_block_named(handle, &outputs)
    }

    /// Close the innermost block, declaring its outputs as `(name, value)`
    /// pairs where `name` is the output's name in the block's interface and
    /// `value` names the value which provides it.
    pub(crate) fn end_block_named(
        &mut self,
        handle: BlockHandle,
        outputs: &[(&str, &str)],
    ) -> Result<Block, BuildError> {
        if self.stack.is_empty() {
            return Err(BuildError::NoOpenBlock);
        }
        if handle.depth != self.stack.len() {
            return Err(BuildError::UnbalancedBlock);
        }
        let output_ids = outputs
            .iter()
            .map(|(_, value)| self.resolve(value))
            .collect::<Result<Vec<_>, _>>()?;
        let output_names = outputs.iter().map(|(name, _)| name.to_string()).collect();

        let mut block = self.stack.pop().ok_or(BuildError::NoOpenBlock)?;
        block.set_outputs(output_ids, output_names);
        Ok(block)
    }

    /// Add a named constant to the innermost block.
    pub fn constant(&mut self, name: &str, value: impl Into<Tensor>) -> Result<Var, BuildError> {
        let value = value.into();
        self.top()?;
        self.check_new_name(name)?;
        let ty = value.tensor_type();
        self.top()?.add_constant(name, value);
        Ok(Var {
            name: name.to_string(),
            ty,
        })
    }

    /// Add a constant with a generated name to the innermost block.
    pub fn add_const(&mut self, value: impl Into<Tensor>) -> Result<Var, BuildError> {
        self.top()?;
        let name = self.generate_name("const");
        self.constant(&name, value)
    }

    /// Validate an operation, infer its output types and append it to the
    /// innermost block.
    ///
    /// Operations of kind `const` add a constant instead.
    pub fn add_op(&mut self, call: OpCall) -> Result<Vec<Var>, BuildError> {
        self.top()?;
        let OpCall {
            kind,
            inputs: call_inputs,
            attrs: call_attrs,
            output_names,
            blocks,
        } = call;

        let op = self
            .registry
            .get(&kind)
            .cloned()
            .ok_or_else(|| BuildError::UnknownOp(kind.clone()))?;
        let kind = op.name();
        let op_name = output_names.as_ref().and_then(|names| names.first().cloned());
        let schema_error = |error| BuildError::Schema {
            kind: kind.to_string(),
            name: op_name.clone(),
            error,
        };

        if op.min_target() > self.target {
            return Err(schema_error(SchemaError::UnavailableAtTarget {
                min: op.min_target(),
                target: self.target,
            }));
        }

        let signature = op.signature();

        let mut attrs = BTreeMap::new();
        for (name, value) in call_attrs {
            let spec = signature
                .attr(&name)
                .ok_or_else(|| schema_error(SchemaError::UnknownAttr(name.clone())))?;
            if value.kind() != spec.kind {
                return Err(schema_error(SchemaError::AttrType {
                    name: spec.name,
                    expected: spec.kind,
                    actual: value.kind(),
                }));
            }
            attrs.insert(spec.name, value);
        }
        if let Some(spec) = signature
            .attrs
            .iter()
            .find(|spec| spec.required && !attrs.contains_key(spec.name))
        {
            return Err(schema_error(SchemaError::MissingAttr(spec.name)));
        }

        if blocks.len() != signature.blocks {
            return Err(schema_error(SchemaError::BlockCount {
                expected: signature.blocks,
                actual: blocks.len(),
            }));
        }

        if let Some((param, _)) = call_inputs
            .iter()
            .find(|(param, _)| signature.input(param).is_none())
        {
            return Err(schema_error(SchemaError::UnknownInput(param.clone())));
        }

        // Inputs are staged and only bound once the op has passed inference,
        // so a rejected op leaves the open blocks unchanged.
        let top_level = self.stack.len() - 1;
        let mut staged: Vec<StagedInput> = Vec::new();
        for spec in signature.inputs {
            let names: Vec<&String> = call_inputs
                .iter()
                .filter(|(param, _)| param == spec.name)
                .map(|(_, name)| name)
                .collect();
            if names.len() > 1 && !spec.variadic {
                return Err(schema_error(SchemaError::TooManyValues(spec.name)));
            }
            if names.is_empty() {
                if let Some(default) = spec.default {
                    let value = default.to_tensor();
                    staged.push(StagedInput {
                        param: spec.name,
                        ty: value.tensor_type(),
                        value: Some(value.clone()),
                        binding: Binding::Default {
                            prefix: format!("{}_{}", kind, spec.name),
                            value,
                        },
                    });
                } else if !spec.optional {
                    return Err(schema_error(SchemaError::MissingInput(spec.name)));
                }
                continue;
            }
            for name in names {
                let input = if spec.const_only {
                    let Some((level, value)) = self.lookup_constant(name) else {
                        self.lookup(name)?;
                        return Err(schema_error(SchemaError::NonConstInput(spec.name)));
                    };
                    let binding = if level == top_level {
                        Binding::Local(self.lookup(name)?.1)
                    } else {
                        Binding::CopyConstant {
                            name: name.clone(),
                            value: value.clone(),
                        }
                    };
                    StagedInput {
                        param: spec.name,
                        ty: value.tensor_type(),
                        value: Some(value),
                        binding,
                    }
                } else {
                    let (level, id) = self.lookup(name)?;
                    let block = &self.stack[level];
                    let ty = block
                        .value_type(id)
                        .ok_or_else(|| BuildError::UnresolvedName(name.clone()))?;
                    if level == top_level {
                        StagedInput {
                            param: spec.name,
                            ty,
                            value: block.constant(id).cloned(),
                            binding: Binding::Local(id),
                        }
                    } else {
                        StagedInput {
                            param: spec.name,
                            ty,
                            value: None,
                            binding: Binding::Capture(name.clone()),
                        }
                    }
                };
                staged.push(input);
            }
        }

        // Float defaults take the element type of a float `x`.
        let x_dtype = staged
            .iter()
            .find(|input| input.param == "x")
            .map(|input| input.ty.dtype())
            .filter(|dtype| dtype.is_float());
        if let Some(dtype) = x_dtype {
            for input in &mut staged {
                let Binding::Default { value, .. } = &mut input.binding else {
                    continue;
                };
                if !value.dtype().is_float() {
                    continue;
                }
                if let Some(converted) = value.cast(dtype) {
                    input.ty = converted.tensor_type();
                    input.value = Some(converted.clone());
                    *value = converted;
                }
            }
        }

        // Values captured by nested blocks must be visible here.
        let block_captures: Vec<String> = blocks
            .iter()
            .flat_map(|block| block.capture_names().map(|n| n.to_string()))
            .collect();
        for name in &block_captures {
            self.lookup(name)?;
        }

        let output_types = {
            let infer_inputs: Vec<InferInput> = staged
                .iter()
                .map(|input| InferInput {
                    param: input.param,
                    ty: &input.ty,
                    value: input.value.as_ref(),
                })
                .collect();
            let interfaces: Vec<BlockInterface> = blocks.iter().map(|b| b.interface()).collect();
            let ctx = InferContext::new(&infer_inputs, &attrs, &interfaces, self.target);
            op.infer(&ctx).map_err(|error| BuildError::Infer {
                kind: kind.to_string(),
                name: op_name.clone(),
                error,
            })?
        };

        let explicit_names = match output_names {
            Some(names) => {
                if names.len() != output_types.len() {
                    return Err(BuildError::OutputCount {
                        kind: kind.to_string(),
                        expected: output_types.len(),
                        actual: names.len(),
                    });
                }
                for (i, name) in names.iter().enumerate() {
                    self.check_new_name(name)?;
                    if names[..i].contains(name) {
                        return Err(BuildError::DuplicateName(name.clone()));
                    }
                }
                Some(names)
            }
            None => None,
        };

        let const_value = if kind == "const" {
            let value = attrs
                .get("val")
                .and_then(|val| val.as_tensor())
                .cloned()
                .ok_or_else(|| schema_error(SchemaError::MissingAttr("val")))?;
            Some(value)
        } else {
            None
        };

        // The op is valid. Bind its inputs and outputs.
        let exclude = explicit_names.clone().unwrap_or_default();
        let mut inputs = Vec::with_capacity(staged.len());
        for input in staged {
            let param = input.param;
            let id = self.commit_input(input.binding, &exclude)?;
            inputs.push(OpInput { param, id });
        }
        for name in &block_captures {
            self.resolve(name)?;
        }

        let output_names = match explicit_names {
            Some(names) => names,
            None => (0..output_types.len())
                .map(|_| self.generate_name(kind))
                .collect(),
        };

        if let Some(value) = const_value {
            let ty = value.tensor_type();
            let name = output_names[0].clone();
            self.top()?.add_constant(&name, value);
            return Ok(vec![Var { name, ty }]);
        }

        let node_name = match output_names.first() {
            Some(name) => name.clone(),
            None => self.generate_name(kind),
        };
        let top = self.top()?;
        let output_ids = output_names
            .iter()
            .zip(&output_types)
            .map(|(name, ty)| top.add_value(name, ty.clone()))
            .collect();
        top.add_op(OperatorNode::new(
            &node_name, op, inputs, attrs, output_ids, blocks,
        ));

        Ok(output_names
            .into_iter()
            .zip(output_types)
            .map(|(name, ty)| Var { name, ty })
            .collect())
    }

    /// Add a top-level function.
    pub fn add_function(&mut self, name: &str, block: Block) -> Result<(), BuildError> {
        self.add_function_with_shapes(name, block, BTreeMap::new())
    }

    /// Add a top-level function whose inputs declare flexible shapes.
    pub fn add_function_with_shapes(
        &mut self,
        name: &str,
        block: Block,
        input_shapes: BTreeMap<String, FlexibleShape>,
    ) -> Result<(), BuildError> {
        if self.functions.contains_key(name) {
            return Err(BuildError::FunctionExists(name.to_string()));
        }
        if let Some(capture) = block.capture_names().next() {
            return Err(BuildError::UnresolvedName(capture.to_string()));
        }
        for (input, shape) in &input_shapes {
            let ty = block
                .node_id(input)
                .filter(|id| block.input_ids().contains(id))
                .and_then(|id| block.value_type(id))
                .ok_or_else(|| BuildError::UnresolvedName(input.clone()))?;
            shape
                .validate(&ty)
                .map_err(|reason| BuildError::InvalidInputShape {
                    input: input.clone(),
                    reason,
                })?;
        }
        self.functions.insert(
            name.to_string(),
            Function {
                block,
                input_shapes,
            },
        );
        Ok(())
    }

    /// Finish building and return the program.
    ///
    /// Fails if a block is still open.
    pub fn finish(self) -> Result<Program, BuildError> {
        if !self.stack.is_empty() {
            return Err(BuildError::UnbalancedBlock);
        }
        Ok(Program {
            target: self.target,
            functions: self.functions,
        })
    }
}
