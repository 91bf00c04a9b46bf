use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};

/// Character encodings supported by string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Utf8,
    /// ISO-8859-1, one byte per char
    Latin1,
    /// Big-endian UTF-16 as used by S7 WSTRING/WCHAR
    Utf16Be,
}

/// Saved cursor position, produced by [`ReadBuffer::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// Big-endian bit/byte cursor over an immutable frame.
///
/// All positions are tracked in bits, so sub-byte fields (flags, 4-bit
/// nibbles, 21-bit addresses) can be read without manual shifting.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    data: Bytes,
    bit_pos: usize,
}

impl ReadBuffer {
    pub fn new(data: Bytes) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Current position in bytes (rounded down).
    #[inline]
    pub fn position(&self) -> usize {
        self.bit_pos / 8
    }

    #[inline]
    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remaining whole bytes after the cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining_bits() / 8
    }

    #[inline]
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }

    #[inline]
    pub fn has_more(&self) -> bool {
        self.remaining_bits() > 0
    }

    #[inline]
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }

    #[inline]
    pub fn mark(&self) -> Mark {
        Mark(self.bit_pos)
    }

    #[inline]
    pub fn reset(&mut self, mark: Mark) {
        self.bit_pos = mark.0;
    }

    fn ensure_bits(&self, bits: usize) -> Result<(), CodecError> {
        let available = self.remaining_bits();
        if bits > available {
            return Err(CodecError::InsufficientData {
                needed: bits,
                available,
            });
        }
        Ok(())
    }

    fn ensure_aligned(&self, what: &str) -> Result<(), CodecError> {
        if !self.is_byte_aligned() {
            return Err(CodecError::decode(format!(
                "{what} requires byte alignment (bit position {})",
                self.bit_pos
            )));
        }
        Ok(())
    }

    /// Read `bits` (1..=64) as an unsigned big-endian value.
    pub fn read_unsigned(&mut self, bits: u8) -> Result<u64, CodecError> {
        if bits == 0 || bits > 64 {
            return Err(CodecError::ValueOutOfRange { field: "bit width" });
        }
        self.ensure_bits(bits as usize)?;
        let mut value: u64 = 0;
        let mut left = bits as usize;
        while left > 0 {
            let byte = self.data[self.bit_pos / 8];
            let offset = self.bit_pos % 8;
            let take = (8 - offset).min(left);
            let shifted = (byte >> (8 - offset - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | shifted as u64;
            self.bit_pos += take;
            left -= take;
        }
        Ok(value)
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_unsigned(1)? == 1)
    }

    #[inline]
    pub fn read_u8(&mut self, bits: u8) -> Result<u8, CodecError> {
        debug_assert!(bits <= 8);
        Ok(self.read_unsigned(bits)? as u8)
    }

    #[inline]
    pub fn read_u16(&mut self, bits: u8) -> Result<u16, CodecError> {
        debug_assert!(bits <= 16);
        Ok(self.read_unsigned(bits)? as u16)
    }

    #[inline]
    pub fn read_u32(&mut self, bits: u8) -> Result<u32, CodecError> {
        debug_assert!(bits <= 32);
        Ok(self.read_unsigned(bits)? as u32)
    }

    #[inline]
    pub fn read_u64(&mut self, bits: u8) -> Result<u64, CodecError> {
        self.read_unsigned(bits)
    }

    /// Read a two's complement value of `bits` width, sign-extended.
    pub fn read_signed(&mut self, bits: u8) -> Result<i64, CodecError> {
        let raw = self.read_unsigned(bits)?;
        if bits == 64 {
            return Ok(raw as i64);
        }
        let shift = 64 - bits as u32;
        Ok(((raw << shift) as i64) >> shift)
    }

    #[inline]
    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_signed(8)? as i8)
    }

    #[inline]
    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.read_signed(16)? as i16)
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_signed(32)? as i32)
    }

    #[inline]
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.read_signed(64)
    }

    #[inline]
    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32(32)?))
    }

    #[inline]
    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64(64)?))
    }

    /// Zero-copy slice of the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, CodecError> {
        self.ensure_aligned("read_bytes")?;
        self.ensure_bits(len * 8)?;
        let start = self.position();
        let out = self.data.slice(start..start + len);
        self.bit_pos += len * 8;
        Ok(out)
    }

    /// Read a fixed-size string field of `len` bytes. Trailing NULs are
    /// trimmed.
    pub fn read_string(
        &mut self,
        len: usize,
        encoding: StringEncoding,
    ) -> Result<String, CodecError> {
        let raw = self.read_bytes(len)?;
        let s = match encoding {
            StringEncoding::Utf8 => String::from_utf8_lossy(&raw).into_owned(),
            StringEncoding::Latin1 => raw.iter().map(|b| *b as char).collect(),
            StringEncoding::Utf16Be => {
                if raw.len() % 2 != 0 {
                    return Err(CodecError::decode("odd UTF-16 byte length"));
                }
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        };
        Ok(s.trim_end_matches('\0').to_string())
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, CodecError> {
        let mut probe = self.clone();
        probe.read_u8(8)
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), CodecError> {
        self.ensure_bits(len * 8)?;
        self.bit_pos += len * 8;
        Ok(())
    }

    /// Slice of the already consumed region `[from, to)` in bytes.
    pub fn slice(&self, from: usize, to: usize) -> Result<Bytes, CodecError> {
        if from > to || to > self.data.len() {
            return Err(CodecError::InsufficientData {
                needed: to * 8,
                available: self.data.len() * 8,
            });
        }
        Ok(self.data.slice(from..to))
    }
}

/// Big-endian bit/byte writer backed by `BytesMut`.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buf: BytesMut,
    acc: u8,
    acc_bits: u8,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            acc: 0,
            acc_bits: 0,
        }
    }

    /// Bytes written so far, counting a partially filled byte as a whole one.
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len() + usize::from(self.acc_bits > 0)
    }

    #[inline]
    pub fn is_byte_aligned(&self) -> bool {
        self.acc_bits == 0
    }

    /// Write the low `bits` of `value` (1..=64), big-endian.
    pub fn write_unsigned(&mut self, bits: u8, value: u64) -> Result<(), CodecError> {
        if bits == 0 || bits > 64 {
            return Err(CodecError::ValueOutOfRange { field: "bit width" });
        }
        if bits < 64 && value >> bits != 0 {
            return Err(CodecError::ValueOutOfRange { field: "value" });
        }
        if self.acc_bits == 0 && bits % 8 == 0 {
            let bytes = value.to_be_bytes();
            self.buf.put_slice(&bytes[8 - bits as usize / 8..]);
            return Ok(());
        }
        for i in (0..bits).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.acc = (self.acc << 1) | bit;
            self.acc_bits += 1;
            if self.acc_bits == 8 {
                self.buf.put_u8(self.acc);
                self.acc = 0;
                self.acc_bits = 0;
            }
        }
        Ok(())
    }

    #[inline]
    pub fn write_bit(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_unsigned(1, value as u64)
    }

    #[inline]
    pub fn write_u8(&mut self, bits: u8, value: u8) -> Result<(), CodecError> {
        self.write_unsigned(bits, value as u64)
    }

    #[inline]
    pub fn write_u16(&mut self, bits: u8, value: u16) -> Result<(), CodecError> {
        self.write_unsigned(bits, value as u64)
    }

    #[inline]
    pub fn write_u32(&mut self, bits: u8, value: u32) -> Result<(), CodecError> {
        self.write_unsigned(bits, value as u64)
    }

    #[inline]
    pub fn write_u64(&mut self, bits: u8, value: u64) -> Result<(), CodecError> {
        self.write_unsigned(bits, value)
    }

    pub fn write_signed(&mut self, bits: u8, value: i64) -> Result<(), CodecError> {
        let mask = if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        self.write_unsigned(bits, (value as u64) & mask)
    }

    #[inline]
    pub fn write_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_u32(32, value.to_bits())
    }

    #[inline]
    pub fn write_f64(&mut self, value: f64) -> Result<(), CodecError> {
        self.write_u64(64, value.to_bits())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        if !self.is_byte_aligned() {
            return Err(CodecError::encode("write_bytes requires byte alignment"));
        }
        self.buf.put_slice(data);
        Ok(())
    }

    /// Write `value` into a fixed field of `len` bytes, NUL padded.
    pub fn write_string(
        &mut self,
        value: &str,
        len: usize,
        encoding: StringEncoding,
    ) -> Result<(), CodecError> {
        let mut raw: Vec<u8> = match encoding {
            StringEncoding::Utf8 => value.as_bytes().to_vec(),
            StringEncoding::Latin1 => value
                .chars()
                .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                .collect(),
            StringEncoding::Utf16Be => value
                .encode_utf16()
                .flat_map(|u| u.to_be_bytes())
                .collect(),
        };
        if raw.len() > len {
            return Err(CodecError::ValueOutOfRange { field: "string" });
        }
        raw.resize(len, 0);
        self.write_bytes(&raw)
    }

    /// Bytes written in the range `[from, to)`, used by checksum fields.
    pub fn written(&self, from: usize, to: usize) -> &[u8] {
        let to = to.min(self.buf.len());
        &self.buf[from.min(to)..to]
    }

    /// Finish writing. A partially filled byte is padded with zero bits.
    pub fn into_bytes(mut self) -> Bytes {
        if self.acc_bits > 0 {
            let byte = self.acc << (8 - self.acc_bits);
            self.buf.put_u8(byte);
        }
        self.buf.freeze()
    }

    /// Hand the written bytes to a framing buffer.
    pub fn into_inner(self) -> BytesMut {
        let bytes = self.into_bytes();
        BytesMut::from(&bytes[..])
    }
}
