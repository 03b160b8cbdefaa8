//! Loading of serialized programs.

use std::collections::BTreeMap;
use std::path::Path;

use milc_model_file::header::Header;
use milc_model_file::schema as sg;
use milc_model_file::Message;

use crate::graph::Block;
use crate::program::{FlexibleShape, OpCall, Program, ProgramBuilder, RangeDim, Var};
use crate::target::TargetVersion;
use crate::types::{DataType, Dimension, TensorType};
use crate::value::{Attr, Tensor};

mod load_error;

pub use load_error::{LoadErrorKind, ModelLoadError};
use load_error::LoadErrorImpl;

/// A program loaded from the milc container format.
///
/// Loading rebuilds every function through a [`ProgramBuilder`], so the
/// program is validated against the op registry and every type is inferred
/// again. A file whose recorded types differ from the inferred ones is
/// rejected.
///
/// ```
/// use milc::{serialize_program, DataType, Model, OpCall, ProgramBuilder, TargetVersion, TensorType};
///
/// let mut pb = ProgramBuilder::new(TargetVersion::Ios17);
/// let block = pb.begin_block(&[("x", TensorType::fixed(DataType::Float32, &[4]))]).unwrap();
/// let x = block.input(0).unwrap().clone();
/// let y = pb.add_op(OpCall::new("relu").input("x", &x)).unwrap();
/// let main = pb.end_block(block, &y).unwrap();
/// pb.add_function("main", main).unwrap();
/// let program = pb.finish().unwrap();
///
/// let data = serialize_program(&program);
/// let model = Model::load(&data).unwrap();
/// assert_eq!(model.program().op_counts(), program.op_counts());
/// ```
pub struct Model {
    spec_version: u32,
    program: Program,
}

impl Model {
    /// Load a serialized program from a byte buffer.
    pub fn load(data: &[u8]) -> Result<Model, ModelLoadError> {
        let header = Header::from_buf(data).map_err(LoadErrorImpl::InvalidHeader)?;
        let proto = sg::Program::decode(header.payload(data)).map_err(LoadErrorImpl::ParseFailed)?;
        if proto.spec_version != header.spec_version {
            return Err(LoadErrorImpl::SpecVersionMismatch {
                header: header.spec_version,
                program: proto.spec_version,
            }
            .into());
        }
        let target = TargetVersion::from_spec_version(proto.spec_version)
            .ok_or(LoadErrorImpl::UnsupportedSpecVersion(proto.spec_version))?;

        let program = ProgramLoader::new(target).load(&proto)?;
        log::debug!(
            "loaded {} functions targeting {}",
            proto.functions.len(),
            target
        );
        Ok(Model {
            spec_version: proto.spec_version,
            program,
        })
    }

    /// Load a serialized program from a file.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Model, ModelLoadError> {
        let data = std::fs::read(path).map_err(LoadErrorImpl::ReadFailed)?;
        Self::load(&data)
    }

    /// Return the spec version recorded in the file.
    pub fn spec_version(&self) -> u32 {
        self.spec_version
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }
}

fn invalid(msg: impl Into<String>) -> LoadErrorImpl {
    LoadErrorImpl::InvalidValue(msg.into())
}

fn dtype_from_proto(dtype: i32) -> Result<DataType, LoadErrorImpl> {
    let dtype = sg::DataType::from_i32(dtype)
        .ok_or_else(|| invalid(format!("unknown data type {}", dtype)))?;
    Ok(match dtype {
        sg::DataType::Bool => DataType::Bool,
        sg::DataType::Int8 => DataType::Int8,
        sg::DataType::Int16 => DataType::Int16,
        sg::DataType::Int32 => DataType::Int32,
        sg::DataType::Int64 => DataType::Int64,
        sg::DataType::Uint8 => DataType::UInt8,
        sg::DataType::Uint16 => DataType::UInt16,
        sg::DataType::Uint32 => DataType::UInt32,
        sg::DataType::Uint64 => DataType::UInt64,
        sg::DataType::Float16 => DataType::Float16,
        sg::DataType::Float32 => DataType::Float32,
        sg::DataType::Float64 => DataType::Float64,
        sg::DataType::String => DataType::String,
    })
}

fn type_from_proto(ty: Option<&sg::TensorType>) -> Result<TensorType, LoadErrorImpl> {
    let ty = ty.ok_or_else(|| invalid("missing type"))?;
    let shape = ty
        .dims
        .iter()
        .map(|dim| match &dim.value {
            Some(sg::dimension::Value::Fixed(size)) => Ok(Dimension::Fixed(*size as usize)),
            Some(sg::dimension::Value::Symbol(name)) => Ok(Dimension::Symbolic(name.clone())),
            None => Err(invalid("missing dimension")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TensorType::new(dtype_from_proto(ty.dtype)?, shape))
}

fn tensor_from_proto(value: &sg::TensorValue) -> Result<Tensor, LoadErrorImpl> {
    let dtype = dtype_from_proto(value.dtype)?;
    let shape: Vec<usize> = value.shape.iter().map(|&size| size as usize).collect();
    let tensor = if dtype == DataType::String {
        Tensor::from_vec(&shape, value.strings.clone())
    } else {
        Tensor::from_le_bytes(dtype, &shape, &value.data)
    };
    tensor.ok_or_else(|| {
        invalid(format!(
            "tensor data does not match type {}{:?}",
            dtype, shape
        ))
    })
}

fn attr_from_proto(attr: &sg::Attribute) -> Result<Attr, LoadErrorImpl> {
    use sg::attribute::Value;

    let value = attr
        .value
        .as_ref()
        .ok_or_else(|| invalid(format!("attribute \"{}\" has no value", attr.name)))?;
    Ok(match value {
        Value::Bool(val) => Attr::Bool(*val),
        Value::Int(val) => Attr::Int(*val),
        Value::Float(val) => Attr::Float(*val),
        Value::Str(val) => Attr::Str(val.clone()),
        Value::Ints(list) => Attr::Ints(list.values.clone()),
        Value::Floats(list) => Attr::Floats(list.values.clone()),
        Value::Tensor(val) => Attr::Tensor(tensor_from_proto(val)?),
    })
}

fn input_shape_from_proto(
    shape: &sg::InputShape,
    ty: &TensorType,
) -> Result<FlexibleShape, LoadErrorImpl> {
    use sg::input_shape::Kind;

    match &shape.kind {
        // Only symbolic dimensions carry a range in memory.
        Some(Kind::Ranges(ranges)) => Ok(FlexibleShape::Ranges(
            ranges
                .dims
                .iter()
                .zip(ty.shape())
                .enumerate()
                .filter(|(_, (_, dim))| dim.is_symbolic())
                .map(|(index, (range, _))| {
                    let upper = (range.upper >= 0).then_some(range.upper as usize);
                    (
                        index,
                        RangeDim::new(range.lower as usize, upper, range.default as usize),
                    )
                })
                .collect(),
        )),
        Some(Kind::Enumerated(shapes)) => Ok(FlexibleShape::Enumerated {
            shapes: shapes
                .shapes
                .iter()
                .map(|shape| shape.dims.iter().map(|&size| size as usize).collect())
                .collect(),
            default: 0,
        }),
        None => Err(invalid(format!(
            "shape of input \"{}\" has no ranges or shapes",
            shape.input
        ))),
    }
}

/// Collect every name declared in `block` and its nested blocks.
fn declared_names(block: &sg::Block, names: &mut Vec<String>) {
    names.extend(block.inputs.iter().map(|input| input.name.clone()));
    for op in &block.operations {
        names.extend(op.outputs.iter().map(|output| output.name.clone()));
        for child in &op.blocks {
            declared_names(child, names);
        }
    }
}

/// Rebuilds a program from its serialized form.
struct ProgramLoader {
    builder: ProgramBuilder,
}

impl ProgramLoader {
    fn new(target: TargetVersion) -> Self {
        ProgramLoader {
            builder: ProgramBuilder::new(target),
        }
    }

    fn load(mut self, proto: &sg::Program) -> Result<Program, ModelLoadError> {
        // Inlined constants get generated names when rebuilt. These must not
        // collide with names declared later in the payload.
        let mut names = Vec::new();
        for function in &proto.functions {
            if let Some(block) = &function.block {
                declared_names(block, &mut names);
            }
        }
        self.builder.reserve_names(names);

        for function in &proto.functions {
            let block_proto = function
                .block
                .as_ref()
                .ok_or_else(|| {
                    ModelLoadError::for_node(&function.name, invalid("function has no block"))
                })?;
            let block = self.load_block(block_proto)?;

            let mut input_shapes = BTreeMap::new();
            for shape in &function.input_shapes {
                let ty = block
                    .node_id(&shape.input)
                    .and_then(|id| block.value_type(id))
                    .ok_or_else(|| {
                        ModelLoadError::for_node(
                            &shape.input,
                            invalid("shape is declared for an unknown input"),
                        )
                    })?;
                let flexible = input_shape_from_proto(shape, &ty)
                    .map_err(|err| ModelLoadError::for_node(&shape.input, err))?;
                input_shapes.insert(shape.input.clone(), flexible);
            }

            self.builder
                .add_function_with_shapes(&function.name, block, input_shapes)
                .map_err(|err| {
                    ModelLoadError::for_node(&function.name, LoadErrorImpl::BuildFailed(err))
                })?;
        }

        self.builder
            .finish()
            .map_err(|err| LoadErrorImpl::BuildFailed(err).into())
    }

    fn load_block(&mut self, proto: &sg::Block) -> Result<Block, ModelLoadError> {
        let inputs = proto
            .inputs
            .iter()
            .map(|input| {
                type_from_proto(input.r#type.as_ref())
                    .map(|ty| (input.name.as_str(), ty))
                    .map_err(|err| ModelLoadError::for_node(&input.name, err))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let handle = self
            .builder
            .begin_block(&inputs)
            .map_err(LoadErrorImpl::BuildFailed)?;

        for op in &proto.operations {
            self.load_op(op)?;
        }

        let outputs: Vec<(&str, &str)> = proto
            .outputs
            .iter()
            .map(|output| (output.name.as_str(), output.value.as_str()))
            .collect();
        let block = self
            .builder
            .end_block_named(handle, &outputs)
            .map_err(LoadErrorImpl::BuildFailed)?;
        Ok(block)
    }

    fn load_op(&mut self, op: &sg::Operation) -> Result<(), ModelLoadError> {
        // Nested blocks are rebuilt first, as the operation takes ownership of
        // them.
        let blocks = op
            .blocks
            .iter()
            .map(|child| self.load_block(child))
            .collect::<Result<Vec<_>, _>>()?;
        self.add_op(op, blocks)
            .map_err(|err| ModelLoadError::for_node(&op.name, err))
    }

    fn add_op(&mut self, op: &sg::Operation, blocks: Vec<Block>) -> Result<(), LoadErrorImpl> {
        let recorded: Vec<TensorType> = op
            .outputs
            .iter()
            .map(|output| type_from_proto(output.r#type.as_ref()))
            .collect::<Result<_, _>>()?;

        let vars = if op.kind == "const" {
            let value = op
                .attributes
                .iter()
                .find(|attr| attr.name == "val")
                .map(attr_from_proto)
                .transpose()?
                .and_then(|val| val.as_tensor().cloned())
                .ok_or_else(|| invalid("constant has no value"))?;
            vec![self
                .builder
                .constant(&op.name, value)
                .map_err(LoadErrorImpl::BuildFailed)?]
        } else {
            self.add_call(op, blocks)?
        };

        if vars.len() != recorded.len() {
            return Err(invalid(format!(
                "{} outputs are recorded but {} were produced",
                recorded.len(),
                vars.len()
            )));
        }
        for (var, recorded) in vars.iter().zip(recorded) {
            if var.ty() != &recorded {
                return Err(LoadErrorImpl::TypeMismatch {
                    recorded,
                    inferred: var.ty().clone(),
                });
            }
        }
        Ok(())
    }

    fn add_call(&mut self, op: &sg::Operation, blocks: Vec<Block>) -> Result<Vec<Var>, LoadErrorImpl> {
        if let Some(operator) = self.builder.registry().get(&op.kind) {
            let expected = operator.min_target().spec_version();
            if op.min_spec_version != expected {
                return Err(LoadErrorImpl::OperatorVersion {
                    kind: op.kind.clone(),
                    recorded: op.min_spec_version,
                    expected,
                });
            }
        }

        let mut call = OpCall::new(&op.kind);
        for arg in &op.inputs {
            for binding in &arg.bindings {
                call = match &binding.value {
                    Some(sg::binding::Value::Name(name)) => call.input_name(&arg.param, name),
                    Some(sg::binding::Value::Constant(value)) => {
                        let var = self
                            .builder
                            .add_const(tensor_from_proto(value)?)
                            .map_err(LoadErrorImpl::BuildFailed)?;
                        call.input(&arg.param, &var)
                    }
                    None => return Err(invalid(format!("empty binding for \"{}\"", arg.param))),
                };
            }
        }
        for attr in &op.attributes {
            call = call.attr(&attr.name, attr_from_proto(attr)?);
        }
        for block in blocks {
            call = call.block(block);
        }
        let output_names: Vec<&str> = op.outputs.iter().map(|o| o.name.as_str()).collect();
        call = call.output_names(&output_names);

        self.builder.add_op(call).map_err(LoadErrorImpl::BuildFailed)
    }
}

#[cfg(test)]
mod tests;
