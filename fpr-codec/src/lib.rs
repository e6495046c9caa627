// Panic-free encode/decode over the fixed-size frame buffer used by the
// wire format in `fpr-core`. Split along the same lines as a typical
// decoder/encoder buffer pair: callers never index the underlying slice
// directly, so a malformed or truncated frame produces a `DecoderError`
// instead of a panic.
#![cfg_attr(not(feature = "std"), no_std)]

mod decoder;
mod encoder;
mod error;

pub use decoder::{DecoderBuffer, DecoderValue};
pub use encoder::EncoderBuffer;
pub use error::DecoderError;
