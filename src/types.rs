//! Element types, dimensions and tensor types.

use std::error::Error;
use std::fmt;

/// Element type of a tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    String,
}

impl DataType {
    /// All element types, in declaration order.
    pub const ALL: [DataType; 13] = [
        DataType::Bool,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float16,
        DataType::Float32,
        DataType::Float64,
        DataType::String,
    ];

    /// Return the builtin type name used in programs (eg. "fp32").
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float16 => "fp16",
            DataType::Float32 => "fp32",
            DataType::Float64 => "fp64",
            DataType::String => "string",
        }
    }

    /// Parse a builtin type name such as "int32" or "fp16".
    pub fn from_name(name: &str) -> Option<DataType> {
        Self::ALL.into_iter().find(|dt| dt.name() == name)
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Float16 | DataType::Float32 | DataType::Float64
        )
    }

    /// Return true for signed and unsigned integer types.
    pub fn is_int(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    /// Return true for types that support arithmetic.
    pub fn is_numeric(self) -> bool {
        self.is_int() || self.is_float()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size of one axis of a tensor type.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// A dimension whose size is known when the program is built.
    Fixed(usize),

    /// A dimension whose size is only known at runtime. Values which share a
    /// symbol are expected to have the same size.
    Symbolic(String),
}

impl Dimension {
    pub fn as_fixed(&self) -> Option<usize> {
        match self {
            Dimension::Fixed(size) => Some(*size),
            Dimension::Symbolic(_) => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Dimension::Symbolic(_))
    }
}

impl From<usize> for Dimension {
    fn from(val: usize) -> Dimension {
        Dimension::Fixed(val)
    }
}

impl From<String> for Dimension {
    fn from(name: String) -> Dimension {
        Dimension::Symbolic(name)
    }
}

impl<'a> From<&'a str> for Dimension {
    fn from(name: &'a str) -> Dimension {
        Dimension::Symbolic(name.into())
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "{}", size),
            Self::Symbolic(name) => write!(f, "\"{}\"", name),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "{}", size),
            Self::Symbolic(name) => write!(f, "{}", name),
        }
    }
}

/// Create a `Vec<Dimension>` from a list of fixed sizes and symbol names.
///
/// ```
/// use milc::{dims, Dimension};
///
/// let shape = dims!["batch", 3, 224, 224];
/// assert_eq!(shape[1], Dimension::Fixed(3));
/// ```
#[macro_export]
macro_rules! dims {
    ($($x:expr),* $(,)?) => {
        vec![$($crate::Dimension::from($x)),*]
    };
}

/// Type of a value in a program: an element type plus a shape.
///
/// A type with an empty shape is a scalar.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    dtype: DataType,
    shape: Vec<Dimension>,
}

impl TensorType {
    pub fn new(dtype: DataType, shape: impl Into<Vec<Dimension>>) -> TensorType {
        TensorType {
            dtype,
            shape: shape.into(),
        }
    }

    /// Create a rank-0 type.
    pub fn scalar(dtype: DataType) -> TensorType {
        TensorType::new(dtype, Vec::new())
    }

    /// Create a type with all dimensions fixed.
    pub fn fixed(dtype: DataType, shape: &[usize]) -> TensorType {
        TensorType::new(dtype, shape.iter().copied().map(Dimension::Fixed).collect::<Vec<_>>())
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[Dimension] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Return the shape as a list of sizes, if every dimension is fixed.
    pub fn fixed_shape(&self) -> Option<Vec<usize>> {
        self.shape.iter().map(|d| d.as_fixed()).collect()
    }

    /// Return the number of elements, if every dimension is fixed.
    pub fn num_elements(&self) -> Option<usize> {
        self.fixed_shape().map(|s| s.iter().product())
    }

    /// Return a copy of this type with a different element type.
    pub fn with_dtype(&self, dtype: DataType) -> TensorType {
        TensorType {
            dtype,
            shape: self.shape.clone(),
        }
    }

    /// Return true if values of type `self` and `other` can be used
    /// interchangeably.
    ///
    /// Types are compatible if their element types match, their ranks match
    /// and each pair of dimensions is either equal or has a symbolic side.
    pub fn is_compatible(&self, other: &TensorType) -> bool {
        self.dtype == other.dtype
            && self.rank() == other.rank()
            && self
                .shape
                .iter()
                .zip(&other.shape)
                .all(|(a, b)| a == b || a.is_symbolic() || b.is_symbolic())
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, ShapeDisplay(&self.shape))
    }
}

impl fmt::Debug for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Formats a shape as `[d0, d1, ...]`.
pub struct ShapeDisplay<'a>(pub &'a [Dimension]);

impl fmt::Display for ShapeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "]")
    }
}

/// Error returned when two shapes cannot be broadcast together.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastError {
    /// Index of the conflicting dimension in the broadcast output shape.
    pub dim: usize,
    pub lhs: Dimension,
    pub rhs: Dimension,
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dimension {} has incompatible sizes {} and {}",
            self.dim, self.lhs, self.rhs
        )
    }
}

impl Error for BroadcastError {}

/// Compute the shape that results from broadcasting two shapes together.
///
/// Shapes are aligned from the trailing dimension and the shorter shape is
/// padded with 1s. A size-1 dimension stretches to match the other side.
/// A symbolic dimension joined with a fixed size > 1 resolves to the fixed
/// size. Two different symbols are assumed to be compatible and the result
/// uses the symbol from `a`.
pub fn broadcast_shapes(a: &[Dimension], b: &[Dimension]) -> Result<Vec<Dimension>, BroadcastError> {
    let out_rank = a.len().max(b.len());
    let a_pad = out_rank - a.len();
    let b_pad = out_rank - b.len();
    let one = Dimension::Fixed(1);

    let mut out_shape = Vec::with_capacity(out_rank);
    for i in 0..out_rank {
        let a_dim = if i < a_pad { &one } else { &a[i - a_pad] };
        let b_dim = if i < b_pad { &one } else { &b[i - b_pad] };

        let dim = match (a_dim, b_dim) {
            (a, b) if a == b => a.clone(),
            (Dimension::Fixed(1), b) => b.clone(),
            (a, Dimension::Fixed(1)) => a.clone(),
            (Dimension::Fixed(_), Dimension::Fixed(_)) => {
                return Err(BroadcastError {
                    dim: i,
                    lhs: a_dim.clone(),
                    rhs: b_dim.clone(),
                });
            }
            (Dimension::Symbolic(_), Dimension::Fixed(size))
            | (Dimension::Fixed(size), Dimension::Symbolic(_)) => Dimension::Fixed(*size),
            (Dimension::Symbolic(_), Dimension::Symbolic(_)) => a_dim.clone(),
        };
        out_shape.push(dim);
    }

    Ok(out_shape)
}

/// Broadcast two fully-fixed shapes.
pub(crate) fn broadcast_fixed(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let to_dims = |s: &[usize]| s.iter().copied().map(Dimension::Fixed).collect::<Vec<_>>();
    broadcast_shapes(&to_dims(a), &to_dims(b))
        .ok()?
        .iter()
        .map(|d| d.as_fixed())
        .collect()
}

/// Resolve an axis given as a value in `[-rank, rank)` to a positive index,
/// or return None if it is out of range.
pub fn resolve_axis(rank: usize, axis: i64) -> Option<usize> {
    let rank = rank as i64;
    if axis < -rank || axis >= rank {
        return None;
    }
    let axis = if axis < 0 { axis + rank } else { axis };
    Some(axis as usize)
}
