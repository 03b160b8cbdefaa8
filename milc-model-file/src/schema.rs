/// A serialized program: a set of named functions plus the spec version they
/// were compiled for.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Program {
    /// Spec version of the target runtime (eg. 8 for iOS17).
    #[prost(uint32, tag = "1")]
    pub spec_version: u32,
    /// Functions, sorted by name.
    #[prost(message, repeated, tag = "2")]
    pub functions: ::prost::alloc::vec::Vec<Function>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Function {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Root block. Its inputs are the function's inputs.
    #[prost(message, optional, tag = "2")]
    pub block: ::core::option::Option<Block>,
    /// Flexible shape descriptions for function inputs.
    #[prost(message, repeated, tag = "3")]
    pub input_shapes: ::prost::alloc::vec::Vec<InputShape>,
}

/// A lexical scope: parameters, operations in program order and outputs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Block {
    #[prost(message, repeated, tag = "1")]
    pub inputs: ::prost::alloc::vec::Vec<NamedValueType>,
    #[prost(message, repeated, tag = "2")]
    pub operations: ::prost::alloc::vec::Vec<Operation>,
    #[prost(message, repeated, tag = "3")]
    pub outputs: ::prost::alloc::vec::Vec<BlockOutput>,
}

/// Declared block output.
///
/// `name` is the name in the block's interface. `value` names the value
/// which provides it. These differ when an optimization forwarded another
/// value to the output.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockOutput {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Operation {
    /// Registered op kind, eg. "matmul".
    #[prost(string, tag = "1")]
    pub kind: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub inputs: ::prost::alloc::vec::Vec<Argument>,
    /// Attributes, sorted by name.
    #[prost(message, repeated, tag = "4")]
    pub attributes: ::prost::alloc::vec::Vec<Attribute>,
    #[prost(message, repeated, tag = "5")]
    pub outputs: ::prost::alloc::vec::Vec<NamedValueType>,
    /// Nested blocks owned by control flow operations.
    #[prost(message, repeated, tag = "6")]
    pub blocks: ::prost::alloc::vec::Vec<Block>,
    /// Minimum spec version of a runtime which supports this operation.
    #[prost(uint32, tag = "7")]
    pub min_spec_version: u32,
}

/// Values bound to one named input of an operation.
///
/// Variadic inputs have more than one binding.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Argument {
    #[prost(string, tag = "1")]
    pub param: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub bindings: ::prost::alloc::vec::Vec<Binding>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Binding {
    #[prost(oneof = "binding::Value", tags = "1, 2")]
    pub value: ::core::option::Option<binding::Value>,
}
/// Nested message and enum types in `Binding`.
pub mod binding {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        /// Reference to a value by name.
        #[prost(string, tag = "1")]
        Name(::prost::alloc::string::String),
        /// Inlined constant.
        #[prost(message, tag = "2")]
        Constant(super::TensorValue),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Attribute {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(oneof = "attribute::Value", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub value: ::core::option::Option<attribute::Value>,
}
/// Nested message and enum types in `Attribute`.
pub mod attribute {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bool, tag = "2")]
        Bool(bool),
        #[prost(int64, tag = "3")]
        Int(i64),
        #[prost(float, tag = "4")]
        Float(f32),
        #[prost(string, tag = "5")]
        Str(::prost::alloc::string::String),
        #[prost(message, tag = "6")]
        Ints(super::IntList),
        #[prost(message, tag = "7")]
        Floats(super::FloatList),
        #[prost(message, tag = "8")]
        Tensor(super::TensorValue),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IntList {
    #[prost(int64, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NamedValueType {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub r#type: ::core::option::Option<TensorType>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorType {
    #[prost(enumeration = "DataType", tag = "1")]
    pub dtype: i32,
    #[prost(message, repeated, tag = "2")]
    pub dims: ::prost::alloc::vec::Vec<Dimension>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Dimension {
    #[prost(oneof = "dimension::Value", tags = "1, 2")]
    pub value: ::core::option::Option<dimension::Value>,
}
/// Nested message and enum types in `Dimension`.
pub mod dimension {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(uint64, tag = "1")]
        Fixed(u64),
        #[prost(string, tag = "2")]
        Symbol(::prost::alloc::string::String),
    }
}

/// Constant tensor data.
///
/// Numeric and boolean elements are stored in `data` as little-endian bytes
/// in row-major order. Booleans use one byte per element. String tensors
/// use `strings` instead.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorValue {
    #[prost(enumeration = "DataType", tag = "1")]
    pub dtype: i32,
    #[prost(uint64, repeated, tag = "2")]
    pub shape: ::prost::alloc::vec::Vec<u64>,
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, repeated, tag = "4")]
    pub strings: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Flexible shape description for a function input.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InputShape {
    #[prost(string, tag = "1")]
    pub input: ::prost::alloc::string::String,
    #[prost(oneof = "input_shape::Kind", tags = "2, 3")]
    pub kind: ::core::option::Option<input_shape::Kind>,
}
/// Nested message and enum types in `InputShape`.
pub mod input_shape {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        Ranges(super::RangeShape),
        #[prost(message, tag = "3")]
        Enumerated(super::EnumeratedShapes),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RangeShape {
    #[prost(message, repeated, tag = "1")]
    pub dims: ::prost::alloc::vec::Vec<DimRange>,
}

/// Allowed sizes of one input dimension.
///
/// A fixed dimension has `lower == upper == default`. An `upper` of -1 means
/// the dimension is unbounded.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DimRange {
    #[prost(uint64, tag = "1")]
    pub lower: u64,
    #[prost(int64, tag = "2")]
    pub upper: i64,
    #[prost(uint64, tag = "3")]
    pub default: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnumeratedShapes {
    #[prost(message, repeated, tag = "1")]
    pub shapes: ::prost::alloc::vec::Vec<Shape>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Shape {
    #[prost(uint64, repeated, tag = "1")]
    pub dims: ::prost::alloc::vec::Vec<u64>,
}

/// Element types of tensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    Bool = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Uint8 = 5,
    Uint16 = 6,
    Uint32 = 7,
    Uint64 = 8,
    Float16 = 9,
    Float32 = 10,
    Float64 = 11,
    String = 12,
}
