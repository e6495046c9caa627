use crate::DecoderError;
use byteorder::{ByteOrder, LittleEndian};

/// A panic-free byte buffer for look-ahead decoding of untrusted input.
///
/// Mirrors the split-on-decode style of a typical wire-format decoder:
/// every `decode_*` call consumes a prefix of the buffer and returns the
/// remainder, so a partially-decoded frame can never alias memory the
/// caller didn't ask for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> DecoderBuffer<'a> {
    #[inline]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn into_less_safe_slice(self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    fn ensure_len(&self, count: usize) -> Result<(), DecoderError> {
        if self.bytes.len() < count {
            Err(DecoderError::UnexpectedEof)
        } else {
            Ok(())
        }
    }

    /// Splits off `count` bytes from the front of the buffer.
    #[inline]
    pub fn decode_slice(self, count: usize) -> Result<(&'a [u8], Self), DecoderError> {
        self.ensure_len(count)?;
        let (head, tail) = self.bytes.split_at(count);
        Ok((head, Self::new(tail)))
    }

    /// Splits off a fixed-size array from the front of the buffer.
    #[inline]
    pub fn decode_array<const N: usize>(self) -> Result<([u8; N], Self), DecoderError> {
        let (slice, rest) = self.decode_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok((out, rest))
    }

    /// Decodes a value of type `T`, splitting the data from the current buffer.
    #[inline]
    pub fn decode<T: DecoderValue<'a>>(self) -> Result<(T, Self), DecoderError> {
        T::decode(self)
    }
}

/// Implemented by every primitive type `DecoderBuffer::decode` can produce.
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> Result<(Self, DecoderBuffer<'a>), DecoderError>;
}

macro_rules! impl_decoder_value_int {
    ($ty:ty, $width:expr, $read:path) => {
        impl<'a> DecoderValue<'a> for $ty {
            #[inline]
            fn decode(
                buffer: DecoderBuffer<'a>,
            ) -> Result<(Self, DecoderBuffer<'a>), DecoderError> {
                let (slice, buffer) = buffer.decode_slice($width)?;
                Ok(($read(slice), buffer))
            }
        }
    };
}

impl_decoder_value_int!(u16, 2, LittleEndian::read_u16);
impl_decoder_value_int!(u32, 4, LittleEndian::read_u32);
impl_decoder_value_int!(i32, 4, LittleEndian::read_i32);

impl<'a> DecoderValue<'a> for u8 {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> Result<(Self, DecoderBuffer<'a>), DecoderError> {
        let (slice, buffer) = buffer.decode_slice(1)?;
        Ok((slice[0], buffer))
    }
}

impl<'a, const N: usize> DecoderValue<'a> for [u8; N] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> Result<(Self, DecoderBuffer<'a>), DecoderError> {
        buffer.decode_array::<N>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_ints() {
        let data = [0x01, 0x00, 0x00, 0x00, 0xFF];
        let buffer = DecoderBuffer::new(&data);
        let (value, buffer) = buffer.decode::<u32>().unwrap();
        assert_eq!(value, 1);
        let (tail, buffer) = buffer.decode_slice(1).unwrap();
        assert_eq!(tail, [0xFF]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_truncated_buffer() {
        let data = [0u8; 2];
        let buffer = DecoderBuffer::new(&data);
        assert_eq!(buffer.decode::<u32>().unwrap_err(), DecoderError::UnexpectedEof);
    }

    #[test]
    fn decodes_fixed_array() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let buffer = DecoderBuffer::new(&data);
        let (mac, buffer): ([u8; 6], _) = buffer.decode().unwrap();
        assert_eq!(mac, [1, 2, 3, 4, 5, 6]);
        assert!(buffer.is_empty());
    }
}
