use std::error::Error;
use std::fmt::{Display, Formatter};

/// Primitive values which can be decoded from little-endian bytes.
trait FromLeBytes: Sized {
    const LEN: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_from_le_bytes {
    ($type:ty) => {
        impl FromLeBytes for $type {
            const LEN: usize = std::mem::size_of::<$type>();

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut array = [0u8; std::mem::size_of::<$type>()];
                array.copy_from_slice(bytes);
                <$type>::from_le_bytes(array)
            }
        }
    };
}
impl_from_le_bytes!(u32);
impl_from_le_bytes!(u64);

/// Read little-endian encoded primitive values from a byte buffer.
struct ValueReader<'a> {
    pos: usize,
    buf: &'a [u8],
}

impl<'a> ValueReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { pos: 0, buf }
    }

    /// Return the next N bytes from the buffer, or None if there aren't enough.
    fn read_n<const N: usize>(&mut self) -> Option<[u8; N]> {
        let chunk = self.buf.get(self.pos..self.pos + N)?;
        self.pos += N;
        let mut array = [0u8; N];
        array.copy_from_slice(chunk);
        Some(array)
    }

    /// Read a little-endian encoded value.
    ///
    /// Returns None if there are not enough bytes left in the buffer.
    fn read<T: FromLeBytes>(&mut self) -> Option<T> {
        let chunk = self.buf.get(self.pos..self.pos + T::LEN)?;
        self.pos += T::LEN;
        Some(T::from_le_slice(chunk))
    }
}

/// Errors produced when reading the header of a serialized program.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderError {
    /// The header is incomplete
    TooShort,

    /// The container format version specified in the header is unsupported.
    UnsupportedVersion(u32),

    /// The header doesn't start with the magic bytes "MILC".
    InvalidMagic,

    /// The program payload offset is invalid.
    InvalidOffset,

    /// The program payload length is invalid.
    InvalidLength,
}

/// Header for a serialized program.
///
/// This specifies the container version, the spec version of the program
/// and the location of the protocol buffers payload within the file.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    /// Version of the container format. Currently 1.
    pub version: u32,

    /// Spec version of the runtime the program targets.
    pub spec_version: u32,

    /// Offset of the payload describing the program.
    pub model_offset: u64,

    /// Length of the payload describing the program.
    pub model_len: u64,
}

impl Header {
    /// Size of the serialized header in bytes.
    pub const LEN: usize = 32;

    /// Magic bytes at the start of every file.
    pub const MAGIC: &'static [u8; 4] = b"MILC";

    /// Container format version written by this crate.
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a header for a payload of `model_len` bytes which immediately
    /// follows the header.
    pub fn new(spec_version: u32, model_len: u64) -> Header {
        Header {
            version: Self::CURRENT_VERSION,
            spec_version,
            model_offset: Self::LEN as u64,
            model_len,
        }
    }

    /// Read the file header from a byte buffer.
    ///
    /// `buf` is expected to be a slice that contains the entire file, as its
    /// length is used to validate the payload location.
    pub fn from_buf(buf: &[u8]) -> Result<Header, HeaderError> {
        let too_short = Err(HeaderError::TooShort);
        let file_size = buf.len() as u64;
        let mut reader = ValueReader::new(buf);

        let Some(magic) = reader.read_n::<4>() else {
            return too_short;
        };
        if &magic != Self::MAGIC {
            return Err(HeaderError::InvalidMagic);
        }

        let Some(version) = reader.read::<u32>() else {
            return too_short;
        };
        if version != Self::CURRENT_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }

        let Some(spec_version) = reader.read::<u32>() else {
            return too_short;
        };

        let Some(model_offset) = reader.read::<u64>() else {
            return too_short;
        };
        if model_offset < Self::LEN as u64 || model_offset > file_size {
            return Err(HeaderError::InvalidOffset);
        }
        let Some(model_len) = reader.read::<u64>() else {
            return too_short;
        };
        if model_offset.saturating_add(model_len) > file_size {
            return Err(HeaderError::InvalidLength);
        }

        Ok(Header {
            version,
            spec_version,
            model_offset,
            model_len,
        })
    }

    /// Serialize this header to a byte buffer of length [`Header::LEN`].
    pub fn to_buf(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::LEN);

        buffer.extend(Self::MAGIC);
        buffer.extend(self.version.to_le_bytes());
        buffer.extend(self.spec_version.to_le_bytes());
        buffer.extend(self.model_offset.to_le_bytes());
        buffer.extend(self.model_len.to_le_bytes());
        buffer.resize(Self::LEN, 0);

        buffer
    }

    /// Return the payload described by this header.
    ///
    /// `buf` must be the buffer which the header was read from.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let start = self.model_offset as usize;
        let end = start + self.model_len as usize;
        &buf[start..end]
    }
}

impl Display for HeaderError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderError::TooShort => write!(fmt, "header is too short"),
            HeaderError::UnsupportedVersion(version) => {
                write!(fmt, "unsupported container version {}", version)
            }
            HeaderError::InvalidMagic => write!(fmt, "incorrect file magic"),
            HeaderError::InvalidOffset => write!(fmt, "payload offset is invalid"),
            HeaderError::InvalidLength => write!(fmt, "payload length is invalid"),
        }
    }
}

impl Error for HeaderError {}
