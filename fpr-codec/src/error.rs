use core::fmt;

/// Reasons a decode can fail. Never panics the caller; every decode
/// operation on `DecoderBuffer` returns one of these instead of indexing
/// out of bounds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecoderError {
    /// the buffer did not contain enough bytes for the requested value
    UnexpectedEof,
    /// a length-prefixed field declared a length that overflows `usize`
    LengthCapacityExceeded,
    /// the decoded value failed a validity check for its type
    InvalidValue,
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::UnexpectedEof => "unexpected end of buffer",
            Self::LengthCapacityExceeded => "length prefix exceeds capacity",
            Self::InvalidValue => "decoded value failed validation",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}
