//! Serialization of programs into the milc container format.

use rustc_hash::{FxHashMap, FxHashSet};

use milc_model_file::header::Header;
use milc_model_file::schema as sg;
use milc_model_file::Message;

use crate::graph::{Block, NodeId, OperatorNode};
use crate::program::{FlexibleShape, Function, Program};
use crate::target::TargetVersion;
use crate::types::{DataType, Dimension, TensorType};
use crate::value::{Attr, Tensor};

pub(crate) fn dtype_to_proto(dtype: DataType) -> sg::DataType {
    match dtype {
        DataType::Bool => sg::DataType::Bool,
        DataType::Int8 => sg::DataType::Int8,
        DataType::Int16 => sg::DataType::Int16,
        DataType::Int32 => sg::DataType::Int32,
        DataType::Int64 => sg::DataType::Int64,
        DataType::UInt8 => sg::DataType::Uint8,
        DataType::UInt16 => sg::DataType::Uint16,
        DataType::UInt32 => sg::DataType::Uint32,
        DataType::UInt64 => sg::DataType::Uint64,
        DataType::Float16 => sg::DataType::Float16,
        DataType::Float32 => sg::DataType::Float32,
        DataType::Float64 => sg::DataType::Float64,
        DataType::String => sg::DataType::String,
    }
}

fn type_to_proto(ty: &TensorType) -> sg::TensorType {
    let dims = ty
        .shape()
        .iter()
        .map(|dim| sg::Dimension {
            value: Some(match dim {
                Dimension::Fixed(size) => sg::dimension::Value::Fixed(*size as u64),
                Dimension::Symbolic(name) => sg::dimension::Value::Symbol(name.clone()),
            }),
        })
        .collect();
    sg::TensorType {
        dtype: dtype_to_proto(ty.dtype()) as i32,
        dims,
    }
}

fn named_type(name: &str, ty: &TensorType) -> sg::NamedValueType {
    sg::NamedValueType {
        name: name.to_string(),
        r#type: Some(type_to_proto(ty)),
    }
}

fn tensor_to_proto(value: &Tensor) -> sg::TensorValue {
    let strings = value
        .as_array::<String>()
        .map(|array| array.iter().cloned().collect())
        .unwrap_or_default();
    sg::TensorValue {
        dtype: dtype_to_proto(value.dtype()) as i32,
        shape: value.shape().iter().map(|&size| size as u64).collect(),
        data: value.to_le_bytes(),
        strings,
    }
}

fn attr_to_proto(name: &str, attr: &Attr) -> sg::Attribute {
    use sg::attribute::Value;

    let value = match attr {
        Attr::Bool(val) => Value::Bool(*val),
        Attr::Int(val) => Value::Int(*val),
        Attr::Float(val) => Value::Float(*val),
        Attr::Str(val) => Value::Str(val.clone()),
        Attr::Ints(values) => Value::Ints(sg::IntList {
            values: values.clone(),
        }),
        Attr::Floats(values) => Value::Floats(sg::FloatList {
            values: values.clone(),
        }),
        Attr::Tensor(val) => Value::Tensor(tensor_to_proto(val)),
    };
    sg::Attribute {
        name: name.to_string(),
        value: Some(value),
    }
}

fn input_shape_to_proto(input: &str, shape: &FlexibleShape, ty: &TensorType) -> sg::InputShape {
    use sg::input_shape::Kind;

    let kind = match shape {
        FlexibleShape::Ranges(ranges) => {
            // Every dimension is described. Fixed dimensions have a
            // single allowed size.
            let dims = ty
                .shape()
                .iter()
                .enumerate()
                .map(|(index, dim)| match (ranges.get(&index), dim) {
                    (Some(range), _) => sg::DimRange {
                        lower: range.lower as u64,
                        upper: range.upper.map(|upper| upper as i64).unwrap_or(-1),
                        default: range.default as u64,
                    },
                    (None, Dimension::Fixed(size)) => sg::DimRange {
                        lower: *size as u64,
                        upper: *size as i64,
                        default: *size as u64,
                    },
                    (None, Dimension::Symbolic(_)) => sg::DimRange {
                        lower: 1,
                        upper: -1,
                        default: 1,
                    },
                })
                .collect();
            Kind::Ranges(sg::RangeShape { dims })
        }
        FlexibleShape::Enumerated { shapes, default } => {
            // The default shape is written first.
            let mut ordered: Vec<&Vec<usize>> = Vec::with_capacity(shapes.len());
            ordered.extend(shapes.get(*default));
            ordered.extend(
                shapes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i != default)
                    .map(|(_, shape)| shape),
            );
            Kind::Enumerated(sg::EnumeratedShapes {
                shapes: ordered
                    .into_iter()
                    .map(|shape| sg::Shape {
                        dims: shape.iter().map(|&size| size as u64).collect(),
                    })
                    .collect(),
            })
        }
    };
    sg::InputShape {
        input: input.to_string(),
        kind: Some(kind),
    }
}

/// Serializes the blocks of a program.
///
/// Scalar constants with exactly one consumer are inlined into the binding
/// of that consumer. All other constants are written as `const` operations
/// at the start of their block, in the order they were added. Values a
/// nested block captures are not written. They are resolved by name when
/// the program is loaded.
struct BlockWriter<'a> {
    block: &'a Block,

    /// Constants to inline into their consumer.
    inlined: FxHashSet<NodeId>,
}

impl<'a> BlockWriter<'a> {
    fn new(block: &'a Block) -> Self {
        let mut uses: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut pinned: FxHashSet<NodeId> = block.output_ids().iter().copied().collect();
        for (_, op) in block.operators() {
            for id in op.input_ids() {
                *uses.entry(id).or_insert(0) += 1;
            }
            pinned.extend(
                op.capture_names()
                    .into_iter()
                    .filter_map(|name| block.node_id(name)),
            );
        }

        let inlined = block
            .constants()
            .filter(|(id, constant)| {
                constant.value().ndim() == 0
                    && uses.get(id) == Some(&1)
                    && !pinned.contains(id)
            })
            .map(|(id, _)| id)
            .collect();

        BlockWriter { block, inlined }
    }

    fn write(&self) -> sg::Block {
        let block = self.block;
        let inputs = block
            .input_ids()
            .iter()
            .filter_map(|id| Some(named_type(block.node(*id)?.name(), &block.value_type(*id)?)))
            .collect();

        let mut operations: Vec<sg::Operation> = block
            .constants()
            .filter(|(id, _)| !self.inlined.contains(id))
            .map(|(_, constant)| {
                let value = constant.value();
                sg::Operation {
                    kind: "const".to_string(),
                    name: constant.name().to_string(),
                    inputs: Vec::new(),
                    attributes: vec![attr_to_proto("val", &Attr::Tensor(value.clone()))],
                    outputs: vec![named_type(constant.name(), &value.tensor_type())],
                    blocks: Vec::new(),
                    min_spec_version: TargetVersion::Ios15.spec_version(),
                }
            })
            .collect();
        operations.extend(block.operators().map(|(_, op)| self.write_op(op)));

        let outputs = block
            .output_ids()
            .iter()
            .zip(block.output_names())
            .map(|(id, name)| sg::BlockOutput {
                name: name.clone(),
                value: block.node_name(*id),
            })
            .collect();

        sg::Block {
            inputs,
            operations,
            outputs,
        }
    }

    fn write_op(&self, op: &OperatorNode) -> sg::Operation {
        let block = self.block;

        // Inputs are stored in signature order, so values bound to a variadic
        // input are adjacent.
        let mut inputs: Vec<sg::Argument> = Vec::new();
        for input in op.inputs() {
            let value = if self.inlined.contains(&input.id) {
                let constant = block.constant(input.id).expect("inlined value is a constant");
                sg::binding::Value::Constant(tensor_to_proto(constant))
            } else {
                sg::binding::Value::Name(block.node_name(input.id))
            };
            let binding = sg::Binding { value: Some(value) };
            match inputs.last_mut() {
                Some(arg) if arg.param == input.param => arg.bindings.push(binding),
                _ => inputs.push(sg::Argument {
                    param: input.param.to_string(),
                    bindings: vec![binding],
                }),
            }
        }

        let outputs = op
            .output_ids()
            .iter()
            .filter_map(|id| Some(named_type(block.node(*id)?.name(), &block.value_type(*id)?)))
            .collect();

        sg::Operation {
            kind: op.kind().to_string(),
            name: op.name().to_string(),
            inputs,
            attributes: op
                .attrs()
                .iter()
                .map(|(name, attr)| attr_to_proto(name, attr))
                .collect(),
            outputs,
            blocks: op
                .blocks()
                .iter()
                .map(|child| BlockWriter::new(child).write())
                .collect(),
            min_spec_version: op.operator().min_target().spec_version(),
        }
    }
}

/// Builds a serialized program from a set of functions.
pub struct ModelBuilder {
    target: TargetVersion,
    functions: Vec<sg::Function>,
}

impl ModelBuilder {
    pub fn new(target: TargetVersion) -> ModelBuilder {
        ModelBuilder {
            target,
            functions: Vec::new(),
        }
    }

    pub fn add_function(&mut self, name: &str, function: &Function) {
        let block = function.block();
        let input_shapes = function
            .input_shapes()
            .iter()
            .filter_map(|(input, shape)| {
                let ty = block.node_id(input).and_then(|id| block.value_type(id))?;
                Some(input_shape_to_proto(input, shape, &ty))
            })
            .collect();
        self.functions.push(sg::Function {
            name: name.to_string(),
            block: Some(BlockWriter::new(block).write()),
            input_shapes,
        });
    }

    /// Finish writing and return the serialized data.
    pub fn finish(mut self) -> Vec<u8> {
        self.functions.sort_by(|a, b| a.name.cmp(&b.name));
        let spec_version = self.target.spec_version();
        let program = sg::Program {
            spec_version,
            functions: self.functions,
        };
        let payload = program.encode_to_vec();

        let header = Header::new(spec_version, payload.len() as u64);
        let mut buf = header.to_buf();
        buf.extend(payload);
        buf
    }
}

/// Serialize a program.
///
/// Serialization is deterministic: equal programs produce identical bytes.
pub fn serialize_program(program: &Program) -> Vec<u8> {
    let mut builder = ModelBuilder::new(program.target());
    for (name, function) in program.functions() {
        builder.add_function(name, function);
    }
    log::debug!(
        "serialized {} functions for {}",
        program.functions().count(),
        program.target()
    );
    builder.finish()
}
