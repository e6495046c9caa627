use byteorder::{ByteOrder, LittleEndian};

/// A fixed-capacity, panic-free encode buffer.
///
/// Writes past the declared capacity are silently truncated rather than
/// panicking; callers that need to know whether everything fit should
/// check `remaining_capacity()` before encoding a variable-length field.
/// Every field in the FPR wire frame is fixed-size, so in practice this
/// never truncates a well-formed frame.
pub struct EncoderBuffer<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl<'a> EncoderBuffer<'a> {
    #[inline]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.bytes.len() - self.pos
    }

    #[inline]
    pub fn encode_bytes(&mut self, value: &[u8]) -> &mut Self {
        let n = value.len().min(self.remaining_capacity());
        self.bytes[self.pos..self.pos + n].copy_from_slice(&value[..n]);
        self.pos += n;
        self
    }

    #[inline]
    pub fn encode_u8(&mut self, value: u8) -> &mut Self {
        self.encode_bytes(&[value])
    }

    #[inline]
    pub fn encode_u16(&mut self, value: u16) -> &mut Self {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.encode_bytes(&buf)
    }

    #[inline]
    pub fn encode_u32(&mut self, value: u32) -> &mut Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.encode_bytes(&buf)
    }

    #[inline]
    pub fn encode_i32(&mut self, value: i32) -> &mut Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.encode_bytes(&buf)
    }
}
