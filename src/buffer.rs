//! Little-endian primitive read/write over a byte cursor.
//!
//! `Buffer` and `WriteBuffer` are the manual codec primitives every NatNet
//! message is packed and unpacked through. They are deliberately not built
//! on a derive-macro codec: the wire layout branches on a runtime-negotiated
//! protocol version, which a fixed derive schema can't express without a
//! context parameter threaded through every field — simpler to read and
//! write the bytes by hand, the way `hdlc.rs` walks a `bytes::Buf` cursor.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NatNetError, Result};

/// A read cursor over an immutable byte slice.
pub struct Buffer<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Buffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Buffer { data, index: 0 }
    }

    /// Bytes left unread.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn position(&self) -> usize {
        self.index
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(NatNetError::malformed(
                format!("need {n} bytes, have {}", self.remaining()),
                self.remaining(),
            ));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(n)?;
        let slice = &self.data[self.index..self.index + n];
        self.index += n;
        Ok(slice)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let b = self.take(1)?[0];
        Ok(b != 0)
    }

    pub fn read_short(&mut self) -> Result<i16> {
        let mut s = self.take(2)?;
        Ok(s.get_i16_le())
    }

    pub fn read_ushort(&mut self) -> Result<u16> {
        let mut s = self.take(2)?;
        Ok(s.get_u16_le())
    }

    pub fn read_int(&mut self) -> Result<i32> {
        let mut s = self.take(4)?;
        Ok(s.get_i32_le())
    }

    pub fn read_uint(&mut self) -> Result<u32> {
        let mut s = self.take(4)?;
        Ok(s.get_u32_le())
    }

    pub fn read_long(&mut self) -> Result<i64> {
        let mut s = self.take(8)?;
        Ok(s.get_i64_le())
    }

    pub fn read_ulong(&mut self) -> Result<u64> {
        let mut s = self.take(8)?;
        Ok(s.get_u64_le())
    }

    pub fn read_float(&mut self) -> Result<f32> {
        let mut s = self.take(4)?;
        Ok(s.get_f32_le())
    }

    pub fn read_double(&mut self) -> Result<f64> {
        let mut s = self.take(8)?;
        Ok(s.get_f64_le())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_vector(&mut self) -> Result<[f32; 3]> {
        Ok([self.read_float()?, self.read_float()?, self.read_float()?])
    }

    pub fn read_quaternion(&mut self) -> Result<[f32; 4]> {
        Ok([
            self.read_float()?,
            self.read_float()?,
            self.read_float()?,
            self.read_float()?,
        ])
    }

    pub fn read_matrix_row(&mut self) -> Result<[f32; 12]> {
        let mut row = [0f32; 12];
        for slot in row.iter_mut() {
            *slot = self.read_float()?;
        }
        Ok(row)
    }

    /// `size == 0`: read to the remainder of the buffer.
    /// `size < 0`: read from the cursor up to `len + size`.
    /// `size > 0`: read exactly `size` bytes.
    pub fn read_bytes(&mut self, size: i64) -> Result<&'a [u8]> {
        let n = if size == 0 {
            self.remaining()
        } else if size < 0 {
            let end = self.data.len() as i64 + size;
            if end < self.index as i64 {
                return Err(NatNetError::malformed("negative read_bytes size", self.remaining()));
            }
            (end - self.index as i64) as usize
        } else {
            size as usize
        };
        self.take(n)
    }

    /// `size == 0`: scan for the next NUL from the cursor, return the bytes
    /// before it as UTF-8 and advance past the NUL.
    /// `size > 0`: consume exactly `size` bytes and return the substring up
    /// to the first embedded NUL.
    pub fn read_string(&mut self, size: usize) -> Result<String> {
        if size > 0 {
            let field = self.take(size)?;
            let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            return std::str::from_utf8(&field[..end])
                .map(str::to_owned)
                .map_err(|e| NatNetError::malformed(format!("invalid utf-8: {e}"), self.remaining()));
        }
        let start = self.index;
        let nul_offset = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| NatNetError::malformed("unterminated string", self.remaining()))?;
        let end = start + nul_offset;
        let value = std::str::from_utf8(&self.data[start..end])
            .map(str::to_owned)
            .map_err(|e| NatNetError::malformed(format!("invalid utf-8: {e}"), self.remaining()))?;
        self.index = end + 1;
        Ok(value)
    }
}

/// A growable write cursor, the dual of [`Buffer`].
pub struct WriteBuffer {
    data: BytesMut,
}

impl WriteBuffer {
    pub fn new() -> Self {
        WriteBuffer { data: BytesMut::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.put_u8(if value { 1 } else { 0 });
    }

    pub fn write_short(&mut self, value: i16) {
        self.data.put_i16_le(value);
    }

    pub fn write_ushort(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn write_uint(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn write_long(&mut self, value: i64) {
        self.data.put_i64_le(value);
    }

    pub fn write_ulong(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    pub fn write_float(&mut self, value: f32) {
        self.data.put_f32_le(value);
    }

    pub fn write_double(&mut self, value: f64) {
        self.data.put_f64_le(value);
    }

    pub fn write_byte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_vector(&mut self, value: [f32; 3]) {
        for v in value {
            self.write_float(v);
        }
    }

    pub fn write_quaternion(&mut self, value: [f32; 4]) {
        for v in value {
            self.write_float(v);
        }
    }

    pub fn write_matrix_row(&mut self, value: [f32; 12]) {
        for v in value {
            self.write_float(v);
        }
    }

    /// Writes raw bytes, zero-padding up to `size` if `value` is shorter.
    pub fn write_bytes(&mut self, value: &[u8], size: usize) {
        self.data.put_slice(value);
        if value.len() < size {
            self.data.put_bytes(0, size - value.len());
        }
    }

    /// Writes a NUL-terminated UTF-8 string, zero-padding up to `size` if
    /// the terminated string is shorter.
    pub fn write_string(&mut self, value: &str, size: usize) {
        self.data.put_slice(value.as_bytes());
        self.data.put_u8(0);
        let written = value.len() + 1;
        if written < size {
            self.data.put_bytes(0, size - written);
        }
    }

    /// Patches two bytes at `index` with a little-endian `i16`, used to
    /// backpatch the envelope's payload-size field after the payload has
    /// been written.
    pub fn set_short(&mut self, index: usize, value: i16) {
        self.data[index..index + 2].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut w = WriteBuffer::new();
        w.write_bool(true);
        w.write_short(-7);
        w.write_int(-123456);
        w.write_ulong(0xdead_beef_cafe_babe);
        w.write_float(1.5);
        w.write_double(2.25);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_short().unwrap(), -7);
        assert_eq!(r.read_int().unwrap(), -123456);
        assert_eq!(r.read_ulong().unwrap(), 0xdead_beef_cafe_babe);
        assert_eq!(r.read_float().unwrap(), 1.5);
        assert_eq!(r.read_double().unwrap(), 2.25);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn string_nul_terminated() {
        let mut w = WriteBuffer::new();
        w.write_string("hello", 0);
        w.write_int(42);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        assert_eq!(r.read_string(0).unwrap(), "hello");
        assert_eq!(r.read_int().unwrap(), 42);
    }

    #[test]
    fn string_fixed_width() {
        let mut w = WriteBuffer::new();
        w.write_string("hi", 8);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 8);
        let mut r = Buffer::new(&bytes);
        assert_eq!(r.read_string(8).unwrap(), "hi");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn read_past_end_is_malformed() {
        let bytes = [0u8; 2];
        let mut r = Buffer::new(&bytes);
        assert!(r.read_int().is_err());
    }

    #[test]
    fn set_short_patches_payload_size() {
        let mut w = WriteBuffer::new();
        w.write_short(0);
        w.write_int(99);
        w.set_short(0, (w.len() - 2) as i16);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        assert_eq!(r.read_short().unwrap(), 4);
    }

    #[test]
    fn read_bytes_remainder_and_negative() {
        let data = [1u8, 2, 3, 4, 5];
        let mut r = Buffer::new(&data);
        let _ = r.read_byte().unwrap();
        assert_eq!(r.read_bytes(0).unwrap(), &[2, 3, 4, 5]);

        let mut r = Buffer::new(&data);
        assert_eq!(r.read_bytes(-2).unwrap(), &[1, 2, 3]);
    }
}
