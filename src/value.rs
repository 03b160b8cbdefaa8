//! Constant tensor data and attribute literals.

use std::fmt;

use half::f16;
use ndarray::{ArcArray, ArrayD, ArrayView, Axis, IxDyn, Zip};

use crate::types::{broadcast_fixed, DataType, TensorType};

/// Shared, immutable n-dimensional array.
pub type ArcTensor<T> = ArcArray<T, IxDyn>;

/// A compile-time constant tensor.
///
/// Constants are cheap to clone, as the element data is reference counted.
/// Equality is structural: two constants are equal if they have the same
/// element type, shape and elements.
#[derive(Clone, PartialEq)]
pub enum Tensor {
    Bool(ArcTensor<bool>),
    Int8(ArcTensor<i8>),
    Int16(ArcTensor<i16>),
    Int32(ArcTensor<i32>),
    Int64(ArcTensor<i64>),
    UInt8(ArcTensor<u8>),
    UInt16(ArcTensor<u16>),
    UInt32(ArcTensor<u32>),
    UInt64(ArcTensor<u64>),
    Float16(ArcTensor<f16>),
    Float32(ArcTensor<f32>),
    Float64(ArcTensor<f64>),
    String(ArcTensor<String>),
}

/// Evaluate `$body` with `$arr` bound to the array inside any tensor variant.
macro_rules! match_tensor {
    ($tensor:expr, $arr:ident => $body:expr) => {
        match $tensor {
            Tensor::Bool($arr) => $body,
            Tensor::Int8($arr) => $body,
            Tensor::Int16($arr) => $body,
            Tensor::Int32($arr) => $body,
            Tensor::Int64($arr) => $body,
            Tensor::UInt8($arr) => $body,
            Tensor::UInt16($arr) => $body,
            Tensor::UInt32($arr) => $body,
            Tensor::UInt64($arr) => $body,
            Tensor::Float16($arr) => $body,
            Tensor::Float32($arr) => $body,
            Tensor::Float64($arr) => $body,
            Tensor::String($arr) => $body,
        }
    };
}

/// Evaluate `$body` with `$arr` bound to the array inside a numeric tensor,
/// or evaluate `$other` for bool and string tensors.
macro_rules! match_numeric {
    ($tensor:expr, $arr:ident => $body:expr, _ => $other:expr) => {
        match $tensor {
            Tensor::Int8($arr) => $body,
            Tensor::Int16($arr) => $body,
            Tensor::Int32($arr) => $body,
            Tensor::Int64($arr) => $body,
            Tensor::UInt8($arr) => $body,
            Tensor::UInt16($arr) => $body,
            Tensor::UInt32($arr) => $body,
            Tensor::UInt64($arr) => $body,
            Tensor::Float16($arr) => $body,
            Tensor::Float32($arr) => $body,
            Tensor::Float64($arr) => $body,
            Tensor::Bool(_) | Tensor::String(_) => $other,
        }
    };
}

/// Variant of `match_numeric` for two tensors which must have the same
/// element type.
macro_rules! match_numeric_pair {
    ($a:expr, $b:expr, ($x:ident, $y:ident) => $body:expr, _ => $other:expr) => {
        match ($a, $b) {
            (Tensor::Int8($x), Tensor::Int8($y)) => $body,
            (Tensor::Int16($x), Tensor::Int16($y)) => $body,
            (Tensor::Int32($x), Tensor::Int32($y)) => $body,
            (Tensor::Int64($x), Tensor::Int64($y)) => $body,
            (Tensor::UInt8($x), Tensor::UInt8($y)) => $body,
            (Tensor::UInt16($x), Tensor::UInt16($y)) => $body,
            (Tensor::UInt32($x), Tensor::UInt32($y)) => $body,
            (Tensor::UInt64($x), Tensor::UInt64($y)) => $body,
            (Tensor::Float16($x), Tensor::Float16($y)) => $body,
            (Tensor::Float32($x), Tensor::Float32($y)) => $body,
            (Tensor::Float64($x), Tensor::Float64($y)) => $body,
            _ => $other,
        }
    };
}

/// Element types which can be stored in a [`Tensor`].
pub trait TensorElement: Clone + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DataType;

    /// Return the array inside `tensor` if it has this element type.
    fn extract(tensor: &Tensor) -> Option<&ArcTensor<Self>>;

    fn wrap(array: ArcTensor<Self>) -> Tensor;
}

macro_rules! impl_tensor_element {
    ($type:ty, $variant:ident) => {
        impl TensorElement for $type {
            const DTYPE: DataType = DataType::$variant;

            fn extract(tensor: &Tensor) -> Option<&ArcTensor<Self>> {
                match tensor {
                    Tensor::$variant(array) => Some(array),
                    _ => None,
                }
            }

            fn wrap(array: ArcTensor<Self>) -> Tensor {
                Tensor::$variant(array)
            }
        }

        impl From<$type> for Tensor {
            /// Create a rank-0 tensor.
            fn from(value: $type) -> Tensor {
                Tensor::$variant(ArcArray::from_elem(IxDyn(&[]), value))
            }
        }
    };
}

impl_tensor_element!(bool, Bool);
impl_tensor_element!(i8, Int8);
impl_tensor_element!(i16, Int16);
impl_tensor_element!(i32, Int32);
impl_tensor_element!(i64, Int64);
impl_tensor_element!(u8, UInt8);
impl_tensor_element!(u16, UInt16);
impl_tensor_element!(u32, UInt32);
impl_tensor_element!(u64, UInt64);
impl_tensor_element!(f16, Float16);
impl_tensor_element!(f32, Float32);
impl_tensor_element!(f64, Float64);
impl_tensor_element!(String, String);

impl<T: TensorElement> From<ArcTensor<T>> for Tensor {
    fn from(array: ArcTensor<T>) -> Tensor {
        T::wrap(array)
    }
}

impl<T: TensorElement> From<ArrayD<T>> for Tensor {
    fn from(array: ArrayD<T>) -> Tensor {
        T::wrap(array.into_shared())
    }
}

/// Numeric element types.
///
/// Value inference computes float results in f64 and integer results in
/// i128, then converts back to the element type.
pub(crate) trait Element: TensorElement + Copy + PartialOrd + LeBytes {
    const IS_FLOAT: bool;

    fn to_f64(self) -> f64;
    fn from_f64(val: f64) -> Self;
    fn to_i128(self) -> i128;
    fn from_i128(val: i128) -> Self;
}

macro_rules! impl_int_element {
    ($type:ty) => {
        impl Element for $type {
            const IS_FLOAT: bool = false;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(val: f64) -> Self {
                val as $type
            }

            fn to_i128(self) -> i128 {
                self as i128
            }

            fn from_i128(val: i128) -> Self {
                val as $type
            }
        }
    };
}

impl_int_element!(i8);
impl_int_element!(i16);
impl_int_element!(i32);
impl_int_element!(i64);
impl_int_element!(u8);
impl_int_element!(u16);
impl_int_element!(u32);
impl_int_element!(u64);

macro_rules! impl_float_element {
    ($type:ty, $to_f64:expr, $from_f64:expr) => {
        impl Element for $type {
            const IS_FLOAT: bool = true;

            fn to_f64(self) -> f64 {
                $to_f64(self)
            }

            fn from_f64(val: f64) -> Self {
                $from_f64(val)
            }

            fn to_i128(self) -> i128 {
                self.to_f64() as i128
            }

            fn from_i128(val: i128) -> Self {
                Self::from_f64(val as f64)
            }
        }
    };
}

impl_float_element!(f16, |x: f16| x.to_f64(), f16::from_f64);
impl_float_element!(f32, |x: f32| x as f64, |x: f64| x as f32);
impl_float_element!(f64, |x: f64| x, |x: f64| x);

/// Fixed-size little-endian encoding of elements.
pub(crate) trait LeBytes: Sized {
    const SIZE: usize;

    fn write_le(&self, out: &mut Vec<u8>);

    /// Decode a value from a slice of exactly `SIZE` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_le_bytes {
    ($type:ty) => {
        impl LeBytes for $type {
            const SIZE: usize = std::mem::size_of::<$type>();

            fn write_le(&self, out: &mut Vec<u8>) {
                out.extend(self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut array = [0u8; std::mem::size_of::<$type>()];
                array.copy_from_slice(bytes);
                <$type>::from_le_bytes(array)
            }
        }
    };
}

impl_le_bytes!(i8);
impl_le_bytes!(i16);
impl_le_bytes!(i32);
impl_le_bytes!(i64);
impl_le_bytes!(u8);
impl_le_bytes!(u16);
impl_le_bytes!(u32);
impl_le_bytes!(u64);
impl_le_bytes!(f16);
impl_le_bytes!(f32);
impl_le_bytes!(f64);

impl LeBytes for bool {
    const SIZE: usize = 1;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Apply `f` to corresponding elements of `a` and `b` after broadcasting
/// them to a common shape.
fn zip_broadcast<A: Clone, B, F: Fn(&A, &A) -> B>(
    a: &ArcTensor<A>,
    b: &ArcTensor<A>,
    f: F,
) -> Option<ArrayD<B>> {
    let shape = broadcast_fixed(a.shape(), b.shape())?;
    let a = a.broadcast(IxDyn(&shape))?;
    let b = b.broadcast(IxDyn(&shape))?;
    Some(Zip::from(&a).and(&b).map_collect(|x, y| f(x, y)))
}

fn map_elements<T: Element>(
    array: &ArcTensor<T>,
    f_float: &dyn Fn(f64) -> f64,
    f_int: &dyn Fn(i128) -> i128,
) -> ArrayD<T> {
    if T::IS_FLOAT {
        array.mapv(|x| T::from_f64(f_float(x.to_f64())))
    } else {
        array.mapv(|x| T::from_i128(f_int(x.to_i128())))
    }
}

fn zip_elements<T: Element>(
    a: &ArcTensor<T>,
    b: &ArcTensor<T>,
    f_float: &dyn Fn(f64, f64) -> f64,
    f_int: &dyn Fn(i128, i128) -> Option<i128>,
) -> Option<ArrayD<T>> {
    if T::IS_FLOAT {
        zip_broadcast(a, b, |x, y| T::from_f64(f_float(x.to_f64(), y.to_f64())))
    } else {
        let result = zip_broadcast(a, b, |x, y| f_int(x.to_i128(), y.to_i128()))?;
        if result.iter().any(|x| x.is_none()) {
            return None;
        }
        Some(result.mapv(|x| T::from_i128(x.unwrap_or_default())))
    }
}

fn encode_le<T: LeBytes>(array: &ArcTensor<T>) -> Vec<u8> {
    let mut out = Vec::with_capacity(array.len() * T::SIZE);
    for x in array.iter() {
        x.write_le(&mut out);
    }
    out
}

fn decode_le<T: LeBytes + TensorElement>(shape: &[usize], bytes: &[u8]) -> Option<Tensor> {
    let len: usize = shape.iter().product();
    if bytes.len() != len * T::SIZE {
        return None;
    }
    let data = bytes.chunks_exact(T::SIZE).map(T::read_le).collect();
    Tensor::from_vec(shape, data)
}

fn convert_f64<T: Element>(array: &ArrayD<f64>) -> Tensor {
    Tensor::from(array.mapv(T::from_f64))
}

fn convert_i128<T: Element>(array: &ArrayD<i128>) -> Tensor {
    Tensor::from(array.mapv(T::from_i128))
}

/// Kind of reduction performed by [`Tensor::reduce`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Reduction {
    Sum,
    Mean,
    Max,
}

impl Tensor {
    /// Create a tensor from a shape and elements in row-major order.
    ///
    /// Returns None if the number of elements doesn't match the shape.
    pub fn from_vec<T: TensorElement>(shape: &[usize], data: Vec<T>) -> Option<Tensor> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .ok()
            .map(Tensor::from)
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Tensor::Bool(_) => DataType::Bool,
            Tensor::Int8(_) => DataType::Int8,
            Tensor::Int16(_) => DataType::Int16,
            Tensor::Int32(_) => DataType::Int32,
            Tensor::Int64(_) => DataType::Int64,
            Tensor::UInt8(_) => DataType::UInt8,
            Tensor::UInt16(_) => DataType::UInt16,
            Tensor::UInt32(_) => DataType::UInt32,
            Tensor::UInt64(_) => DataType::UInt64,
            Tensor::Float16(_) => DataType::Float16,
            Tensor::Float32(_) => DataType::Float32,
            Tensor::Float64(_) => DataType::Float64,
            Tensor::String(_) => DataType::String,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match_tensor!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        match_tensor!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the type of a value holding this tensor.
    pub fn tensor_type(&self) -> TensorType {
        TensorType::fixed(self.dtype(), self.shape())
    }

    /// Return the array inside this tensor if it has element type `T`.
    pub fn as_array<T: TensorElement>(&self) -> Option<&ArcTensor<T>> {
        T::extract(self)
    }

    /// Return the single element of a numeric tensor as an f64.
    ///
    /// The tensor may have any rank, as long as it contains one element.
    pub fn item_f64(&self) -> Option<f64> {
        match_numeric!(self, a => {
            if a.len() == 1 {
                a.iter().next().map(|x| x.to_f64())
            } else {
                None
            }
        }, _ => None)
    }

    /// Return the elements of an integer tensor in row-major order.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        if !self.dtype().is_int() {
            return None;
        }
        match_numeric!(self, a => Some(a.iter().map(|x| x.to_i128() as i64).collect()), _ => None)
    }

    /// Return the elements of a numeric tensor converted to f64.
    pub(crate) fn to_f64_array(&self) -> Option<ArrayD<f64>> {
        match_numeric!(self, a => Some(a.mapv(|x| x.to_f64())), _ => None)
    }

    fn to_i128_array(&self) -> Option<ArrayD<i128>> {
        match self {
            Tensor::Bool(a) => Some(a.mapv(|x| x as i128)),
            other => match_numeric!(other, a => Some(a.mapv(|x| x.to_i128())), _ => None),
        }
    }

    /// Create a tensor of type `dtype` from f64 values.
    pub(crate) fn from_f64_array(dtype: DataType, array: &ArrayD<f64>) -> Option<Tensor> {
        let tensor = match dtype {
            DataType::Bool => Tensor::from(array.mapv(|x| x != 0.0)),
            DataType::Int8 => convert_f64::<i8>(array),
            DataType::Int16 => convert_f64::<i16>(array),
            DataType::Int32 => convert_f64::<i32>(array),
            DataType::Int64 => convert_f64::<i64>(array),
            DataType::UInt8 => convert_f64::<u8>(array),
            DataType::UInt16 => convert_f64::<u16>(array),
            DataType::UInt32 => convert_f64::<u32>(array),
            DataType::UInt64 => convert_f64::<u64>(array),
            DataType::Float16 => convert_f64::<f16>(array),
            DataType::Float32 => convert_f64::<f32>(array),
            DataType::Float64 => convert_f64::<f64>(array),
            DataType::String => return None,
        };
        Some(tensor)
    }

    fn from_i128_array(dtype: DataType, array: &ArrayD<i128>) -> Option<Tensor> {
        let tensor = match dtype {
            DataType::Bool => Tensor::from(array.mapv(|x| x != 0)),
            DataType::Int8 => convert_i128::<i8>(array),
            DataType::Int16 => convert_i128::<i16>(array),
            DataType::Int32 => convert_i128::<i32>(array),
            DataType::Int64 => convert_i128::<i64>(array),
            DataType::UInt8 => convert_i128::<u8>(array),
            DataType::UInt16 => convert_i128::<u16>(array),
            DataType::UInt32 => convert_i128::<u32>(array),
            DataType::UInt64 => convert_i128::<u64>(array),
            DataType::Float16 => convert_i128::<f16>(array),
            DataType::Float32 => convert_i128::<f32>(array),
            DataType::Float64 => convert_i128::<f64>(array),
            DataType::String => return None,
        };
        Some(tensor)
    }

    /// Convert this tensor to a different element type.
    ///
    /// Float to integer conversions truncate towards zero and saturate.
    /// Integer to integer conversions wrap. String tensors can't be
    /// converted.
    pub fn cast(&self, dtype: DataType) -> Option<Tensor> {
        if self.dtype() == dtype {
            return Some(self.clone());
        }
        if self.dtype().is_float() {
            Tensor::from_f64_array(dtype, &self.to_f64_array()?)
        } else {
            Tensor::from_i128_array(dtype, &self.to_i128_array()?)
        }
    }

    /// Apply an elementwise function to a numeric tensor.
    ///
    /// Float tensors use `f_float` and integer tensors use `f_int`.
    pub(crate) fn map_numeric(
        &self,
        f_float: impl Fn(f64) -> f64,
        f_int: impl Fn(i128) -> i128,
    ) -> Option<Tensor> {
        match_numeric!(self, a => Some(Tensor::from(map_elements(a, &f_float, &f_int))), _ => None)
    }

    /// Apply an elementwise function to a float tensor.
    pub(crate) fn map_float(&self, f: impl Fn(f64) -> f64) -> Option<Tensor> {
        if !self.dtype().is_float() {
            return None;
        }
        self.map_numeric(f, |x| x)
    }

    /// Combine two numeric tensors of the same type elementwise, with
    /// broadcasting.
    ///
    /// `f_int` may return None to signal that the result is undefined (eg.
    /// integer division by zero), in which case this returns None.
    pub(crate) fn zip_numeric(
        &self,
        other: &Tensor,
        f_float: impl Fn(f64, f64) -> f64,
        f_int: impl Fn(i128, i128) -> Option<i128>,
    ) -> Option<Tensor> {
        match_numeric_pair!(self, other, (a, b) => {
            zip_elements(a, b, &f_float, &f_int).map(Tensor::from)
        }, _ => None)
    }

    /// Compare two numeric tensors of the same type elementwise, with
    /// broadcasting, producing a bool tensor.
    pub(crate) fn compare(&self, other: &Tensor, f: impl Fn(f64, f64) -> bool) -> Option<Tensor> {
        match_numeric_pair!(self, other, (a, b) => {
            zip_broadcast(a, b, |x, y| f(x.to_f64(), y.to_f64())).map(Tensor::from)
        }, _ => None)
    }

    /// Reduce a numeric tensor over `axes`.
    pub(crate) fn reduce(&self, axes: &[usize], keep_dims: bool, kind: Reduction) -> Option<Tensor> {
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        axes.dedup();

        let mut out = self.to_f64_array()?;
        for &axis in axes.iter().rev() {
            out = match kind {
                Reduction::Sum => out.sum_axis(Axis(axis)),
                Reduction::Mean => out.mean_axis(Axis(axis))?,
                Reduction::Max => out.fold_axis(Axis(axis), f64::NEG_INFINITY, |acc, x| acc.max(*x)),
            };
            if keep_dims {
                out = out.insert_axis(Axis(axis));
            }
        }
        Tensor::from_f64_array(self.dtype(), &out)
    }

    /// Permute the axes of this tensor.
    pub(crate) fn permute(&self, perm: &[usize]) -> Tensor {
        match_tensor!(self, a => Tensor::from(a.clone().permuted_axes(IxDyn(perm))))
    }

    /// Change the shape of this tensor, keeping elements in row-major order.
    pub(crate) fn reshape(&self, shape: &[usize]) -> Option<Tensor> {
        match_tensor!(self, a => {
            let reshaped = a.to_shape(IxDyn(shape)).ok()?;
            Some(Tensor::from(reshaped.into_owned()))
        })
    }

    /// Select entries along `axis` using `indices`, which must already be
    /// resolved to positive values. The indexed axis is replaced by
    /// `indices_shape`.
    pub(crate) fn gather(&self, axis: usize, indices: &[usize], indices_shape: &[usize]) -> Option<Tensor> {
        let mut out_shape = self.shape()[..axis].to_vec();
        out_shape.extend_from_slice(indices_shape);
        out_shape.extend_from_slice(&self.shape()[axis + 1..]);

        match_tensor!(self, a => {
            if indices.iter().any(|&i| i >= a.shape()[axis]) {
                return None;
            }
            let selected = a.select(Axis(axis), indices);
            let reshaped = selected.to_shape(IxDyn(&out_shape)).ok()?;
            Some(Tensor::from(reshaped.into_owned()))
        })
    }

    /// Concatenate tensors of the same element type along `axis`.
    pub(crate) fn concat(tensors: &[&Tensor], axis: usize) -> Option<Tensor> {
        fn concat_same<T: TensorElement>(first: &ArcTensor<T>, tensors: &[&Tensor], axis: usize) -> Option<Tensor> {
            let _ = first;
            let views: Option<Vec<ArrayView<T, IxDyn>>> = tensors
                .iter()
                .map(|t| T::extract(t).map(|a| a.view()))
                .collect();
            let result = ndarray::concatenate(Axis(axis), &views?).ok()?;
            Some(Tensor::from(result))
        }

        let first = tensors.first()?;
        match_tensor!(first, a => concat_same(a, tensors, axis))
    }

    /// Return the elements as little-endian bytes in row-major order.
    ///
    /// String tensors return an empty buffer. Use [`Tensor::as_array`] to
    /// access their elements.
    pub(crate) fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Tensor::Bool(a) => encode_le(a),
            Tensor::String(_) => Vec::new(),
            other => match_numeric!(other, a => encode_le(a), _ => Vec::new()),
        }
    }

    /// Decode a tensor encoded with [`Tensor::to_le_bytes`].
    pub(crate) fn from_le_bytes(dtype: DataType, shape: &[usize], bytes: &[u8]) -> Option<Tensor> {
        match dtype {
            DataType::Bool => decode_le::<bool>(shape, bytes),
            DataType::Int8 => decode_le::<i8>(shape, bytes),
            DataType::Int16 => decode_le::<i16>(shape, bytes),
            DataType::Int32 => decode_le::<i32>(shape, bytes),
            DataType::Int64 => decode_le::<i64>(shape, bytes),
            DataType::UInt8 => decode_le::<u8>(shape, bytes),
            DataType::UInt16 => decode_le::<u16>(shape, bytes),
            DataType::UInt32 => decode_le::<u32>(shape, bytes),
            DataType::UInt64 => decode_le::<u64>(shape, bytes),
            DataType::Float16 => decode_le::<f16>(shape, bytes),
            DataType::Float32 => decode_le::<f32>(shape, bytes),
            DataType::Float64 => decode_le::<f64>(shape, bytes),
            DataType::String => None,
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dtype())?;
        match_tensor!(self, a => write!(f, "{:?}", a))
    }
}

/// Kind of literal accepted by an attribute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttrKind {
    Bool,
    Int,
    Float,
    Str,
    Ints,
    Floats,
    Tensor,
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrKind::Bool => "bool",
            AttrKind::Int => "int",
            AttrKind::Float => "float",
            AttrKind::Str => "string",
            AttrKind::Ints => "int list",
            AttrKind::Floats => "float list",
            AttrKind::Tensor => "tensor",
        };
        f.write_str(name)
    }
}

/// Literal value of an operation attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Attr {
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Tensor(Tensor),
}

impl Attr {
    pub fn kind(&self) -> AttrKind {
        match self {
            Attr::Bool(_) => AttrKind::Bool,
            Attr::Int(_) => AttrKind::Int,
            Attr::Float(_) => AttrKind::Float,
            Attr::Str(_) => AttrKind::Str,
            Attr::Ints(_) => AttrKind::Ints,
            Attr::Floats(_) => AttrKind::Floats,
            Attr::Tensor(_) => AttrKind::Tensor,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attr::Bool(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attr::Int(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Attr::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attr::Str(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Attr::Ints(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            Attr::Floats(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Attr::Tensor(x) => Some(x),
            _ => None,
        }
    }
}

impl From<bool> for Attr {
    fn from(val: bool) -> Attr {
        Attr::Bool(val)
    }
}

impl From<i64> for Attr {
    fn from(val: i64) -> Attr {
        Attr::Int(val)
    }
}

impl From<f32> for Attr {
    fn from(val: f32) -> Attr {
        Attr::Float(val)
    }
}

impl From<&str> for Attr {
    fn from(val: &str) -> Attr {
        Attr::Str(val.to_string())
    }
}

impl From<String> for Attr {
    fn from(val: String) -> Attr {
        Attr::Str(val)
    }
}

impl From<Vec<i64>> for Attr {
    fn from(val: Vec<i64>) -> Attr {
        Attr::Ints(val)
    }
}

impl<const N: usize> From<[i64; N]> for Attr {
    fn from(val: [i64; N]) -> Attr {
        Attr::Ints(val.into())
    }
}

impl From<Vec<f32>> for Attr {
    fn from(val: Vec<f32>) -> Attr {
        Attr::Floats(val)
    }
}

impl From<Tensor> for Attr {
    fn from(val: Tensor) -> Attr {
        Attr::Tensor(val)
    }
}

impl From<DataType> for Attr {
    /// Element types are passed to operations by name, eg. `cast(dtype="fp16")`.
    fn from(val: DataType) -> Attr {
        Attr::Str(val.name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use half::f16;

    use super::{Attr, Reduction, Tensor};
    use crate::types::DataType;

    fn vec_f32(shape: &[usize], data: &[f32]) -> Tensor {
        Tensor::from_vec(shape, data.to_vec()).unwrap()
    }

    #[test]
    fn test_scalar_tensor() {
        let t = Tensor::from(0.5f32);
        assert_eq!(t.dtype(), DataType::Float32);
        assert_eq!(t.shape(), &[] as &[usize]);
        assert_eq!(t.item_f64(), Some(0.5));
        assert_eq!(t.tensor_type().to_string(), "fp32[]");
    }

    #[test]
    fn test_structural_equality() {
        let a = vec_f32(&[2], &[1., 2.]);
        let b = vec_f32(&[2], &[1., 2.]);
        let c = vec_f32(&[1, 2], &[1., 2.]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Tensor::from(1i32), Tensor::from(1i64));
    }

    #[test]
    fn test_cast() {
        let t = vec_f32(&[3], &[1.5, -2.7, 0.0]);

        let ints = t.cast(DataType::Int32).unwrap();
        assert_eq!(ints, Tensor::from_vec(&[3], vec![1i32, -2, 0]).unwrap());

        let bools = t.cast(DataType::Bool).unwrap();
        assert_eq!(bools, Tensor::from_vec(&[3], vec![true, true, false]).unwrap());

        let halfs = t.cast(DataType::Float16).unwrap();
        assert_eq!(halfs.dtype(), DataType::Float16);
        assert_eq!(
            halfs.as_array::<f16>().unwrap().iter().next().copied(),
            Some(f16::from_f32(1.5))
        );

        let strings = Tensor::from("x".to_string());
        assert!(strings.cast(DataType::Float32).is_none());
    }

    #[test]
    fn test_zip_numeric_broadcasts() {
        let a = vec_f32(&[2, 1], &[1., 2.]);
        let b = vec_f32(&[3], &[10., 20., 30.]);
        let sum = a.zip_numeric(&b, |x, y| x + y, |x, y| Some(x + y)).unwrap();
        assert_eq!(sum, vec_f32(&[2, 3], &[11., 21., 31., 12., 22., 32.]));

        // Mismatched element types.
        assert!(a.zip_numeric(&Tensor::from(1i32), |x, _| x, |x, _| Some(x)).is_none());

        // Undefined integer result.
        let zero = Tensor::from(0i32);
        assert!(Tensor::from(4i32)
            .zip_numeric(&zero, |x, y| x / y, |x, y| x.checked_div(y))
            .is_none());
    }

    #[test]
    fn test_reduce() {
        let t = vec_f32(&[2, 3], &[1., 2., 3., 4., 5., 6.]);

        let sum = t.reduce(&[1], false, Reduction::Sum).unwrap();
        assert_eq!(sum, vec_f32(&[2], &[6., 15.]));

        let mean = t.reduce(&[0, 1], true, Reduction::Mean).unwrap();
        assert_eq!(mean.shape(), &[1, 1]);
        assert_relative_eq!(mean.item_f64().unwrap(), 3.5);

        let max = t.reduce(&[0], false, Reduction::Max).unwrap();
        assert_eq!(max, vec_f32(&[3], &[4., 5., 6.]));
    }

    #[test]
    fn test_layout_ops() {
        let t = vec_f32(&[2, 3], &[1., 2., 3., 4., 5., 6.]);

        let transposed = t.permute(&[1, 0]);
        assert_eq!(transposed, vec_f32(&[3, 2], &[1., 4., 2., 5., 3., 6.]));
        assert_eq!(
            transposed.to_le_bytes(),
            vec_f32(&[3, 2], &[1., 4., 2., 5., 3., 6.]).to_le_bytes()
        );

        let reshaped = transposed.reshape(&[6]).unwrap();
        assert_eq!(reshaped, vec_f32(&[6], &[1., 4., 2., 5., 3., 6.]));
        assert!(t.reshape(&[4]).is_none());

        let gathered = t.gather(1, &[2, 0], &[2]).unwrap();
        assert_eq!(gathered, vec_f32(&[2, 2], &[3., 1., 6., 4.]));
        assert!(t.gather(0, &[2], &[1]).is_none());

        let joined = Tensor::concat(&[&t, &t], 0).unwrap();
        assert_eq!(joined.shape(), &[4, 3]);
    }

    #[test]
    fn test_le_bytes_encoding() {
        let t = Tensor::from_vec(&[2], vec![1i16, -2]).unwrap();
        let bytes = t.to_le_bytes();
        assert_eq!(bytes, [1, 0, 0xfe, 0xff]);
        assert_eq!(Tensor::from_le_bytes(DataType::Int16, &[2], &bytes), Some(t));
        assert_eq!(Tensor::from_le_bytes(DataType::Int16, &[3], &bytes), None);
    }

    #[test]
    fn test_attr_kinds() {
        assert_eq!(Attr::from([1i64, 0]).as_ints(), Some(&[1i64, 0][..]));
        assert_eq!(Attr::from(DataType::Float16).as_str(), Some("fp16"));
        assert_eq!(Attr::from(0.5f32).as_int(), None);
    }
}
