//! Low-level crate for reading and writing serialized milc programs.
//!
//! # About the file format
//!
//! A serialized program consists of a fixed-size [`header`] followed by a
//! protocol buffers payload described by the messages in [`schema`]. The
//! header records the container format version and the spec version of the
//! program, so that readers can reject files they don't understand before
//! decoding the payload.

/// Protocol buffer messages describing a program.
pub mod schema;

/// Parse the header of a serialized program.
pub mod header;

pub use prost::Message;
