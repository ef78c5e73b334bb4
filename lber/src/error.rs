use thiserror::Error;

use crate::common::TagClass;

/// Failure modes of the BER decoder.
///
/// The decoder never panics; every path that can fail returns one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BerError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("indefinite length encoding is not supported (offset {offset})")]
    IndefiniteLength { offset: usize },
    #[error("length at offset {offset} declares {declared} bytes but only {remaining} remain")]
    LengthOverrun {
        offset: usize,
        declared: u64,
        remaining: usize,
    },
    #[error("long-form length at offset {offset} uses more than 8 octets")]
    LengthTooWide { offset: usize },
    #[error("integer at offset {offset} is wider than 64 bits")]
    IntegerTooWide { offset: usize },
    #[error("unsupported tag (class {class:?}, number {id}) at offset {offset}")]
    UnsupportedTag {
        offset: usize,
        class: TagClass,
        id: u64,
    },
    #[error("trailing bytes after a complete tag ({remaining} bytes)")]
    TrailingBytes { remaining: usize },
}
