//! Binary stream codec
//!
//! Primitive write/read cursors used by the record codec. All multi-byte fixed
//! integers are big-endian; variable-length integers carry 7 data bits per
//! byte, least-significant group first.
//!
//! ```text
//! varuint: [c|d6..d0] [c|d13..d7] ...
//! varint:  [c|m5..m0|s] [c|m12..m6] ...      s = sign, m = magnitude
//! ```

mod reader;
mod writer;

pub use reader::ReadStream;
pub use writer::WriteStream;

use serde::{Deserialize, Serialize};

/// Continuation bit of a variable-length integer byte
pub(crate) const CONTINUATION: u8 = 0x80;

/// Tags of the generic numeric encoding
pub(crate) mod number_tags {
    pub const UNSIGNED: u8 = 0;
    pub const NEGATIVE: u8 = 1;
    pub const FLOAT: u8 = 2;
}

/// A number of unknown representation, written with the smallest encoding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    /// Any integer
    Integer(i128),
    /// IEEE-754 double
    Float(f64),
}
