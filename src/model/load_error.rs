use std::error::Error;
use std::fmt::{Display, Formatter};

use milc_model_file::header::HeaderError;

use crate::program::BuildError;
use crate::types::TensorType;

/// Errors that occur when loading a serialized program.
#[derive(Debug)]
pub struct ModelLoadError {
    inner: LoadErrorImpl,
    node: Option<String>,
}

impl ModelLoadError {
    pub(crate) fn new(kind: LoadErrorImpl) -> Self {
        Self {
            inner: kind,
            node: None,
        }
    }

    pub(crate) fn for_node(node: &str, kind: LoadErrorImpl) -> Self {
        Self {
            inner: kind,
            node: Some(node.to_string()),
        }
    }

    /// The name of the operation or value that this error relates to.
    ///
    /// This is `None` if the error is not about a specific node.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// Return the category of error.
    pub fn kind(&self) -> LoadErrorKind {
        self.inner.kind()
    }
}

impl Display for ModelLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(node) = self.node.as_deref() {
            write!(f, "in node \"{}\": {}", node, self.inner)
        } else {
            self.inner.fmt(f)
        }
    }
}

impl Error for ModelLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

impl From<LoadErrorImpl> for ModelLoadError {
    fn from(val: LoadErrorImpl) -> Self {
        Self::new(val)
    }
}

/// Categories of error when loading a program.
///
/// See [`ModelLoadError::kind`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum LoadErrorKind {
    /// An I/O error occurred reading the file.
    IoError,

    /// The header or payload could not be decoded.
    ParseError,

    /// The program targets a spec version this crate doesn't support.
    VersionError,

    /// An operation could not be rebuilt from its description.
    OperatorInvalid,

    /// The rebuilt program doesn't match what was recorded.
    GraphError,
}

/// The internal implementation of [`ModelLoadError`].
#[derive(Debug)]
pub(crate) enum LoadErrorImpl {
    /// An error occurred reading the file from disk.
    ReadFailed(std::io::Error),

    /// The file's header is invalid.
    InvalidHeader(HeaderError),

    /// The payload is not a valid encoded program.
    ParseFailed(prost::DecodeError),

    /// The header and payload disagree about the spec version.
    SpecVersionMismatch { header: u32, program: u32 },

    UnsupportedSpecVersion(u32),

    /// A type, tensor or attribute in the payload is malformed.
    InvalidValue(String),

    /// The recorded minimum spec version of an operation differs from the
    /// registered op kind's.
    OperatorVersion {
        kind: String,
        recorded: u32,
        expected: u32,
    },

    /// The builder rejected an operation, block or function.
    BuildFailed(BuildError),

    /// Inference produced a different type than the one recorded.
    TypeMismatch {
        recorded: TensorType,
        inferred: TensorType,
    },
}

impl LoadErrorImpl {
    fn kind(&self) -> LoadErrorKind {
        match self {
            Self::ReadFailed(_) => LoadErrorKind::IoError,
            Self::InvalidHeader(_) | Self::ParseFailed(_) | Self::InvalidValue(_) => {
                LoadErrorKind::ParseError
            }
            Self::SpecVersionMismatch { .. } | Self::UnsupportedSpecVersion(_) => {
                LoadErrorKind::VersionError
            }
            Self::OperatorVersion { .. } | Self::BuildFailed(_) => LoadErrorKind::OperatorInvalid,
            Self::TypeMismatch { .. } => LoadErrorKind::GraphError,
        }
    }
}

impl Display for LoadErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(e) => write!(f, "read error: {}", e),
            Self::InvalidHeader(e) => write!(f, "invalid header: {}", e),
            Self::ParseFailed(e) => write!(f, "parse error: {}", e),
            Self::SpecVersionMismatch { header, program } => write!(
                f,
                "header spec version {} does not match program spec version {}",
                header, program
            ),
            Self::UnsupportedSpecVersion(version) => {
                write!(f, "unsupported spec version {}", version)
            }
            Self::InvalidValue(e) => write!(f, "invalid value: {}", e),
            Self::OperatorVersion {
                kind,
                recorded,
                expected,
            } => write!(
                f,
                "{} is recorded with minimum spec version {} but requires {}",
                kind, recorded, expected
            ),
            Self::BuildFailed(e) => write!(f, "build error: {}", e),
            Self::TypeMismatch { recorded, inferred } => write!(
                f,
                "recorded type {} does not match inferred type {}",
                recorded, inferred
            ),
        }
    }
}

impl Error for LoadErrorImpl {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadFailed(e) => Some(e),
            Self::InvalidHeader(e) => Some(e),
            Self::ParseFailed(e) => Some(e),
            Self::BuildFailed(e) => Some(e),
            _ => None,
        }
    }
}
