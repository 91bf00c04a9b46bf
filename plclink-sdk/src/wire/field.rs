//! Field-level read/write primitives.
//!
//! Each function covers one field kind of a wire structure description.
//! Message types compose them inside their `WireDecode`/`WireEncode`
//! implementations.

use super::buffer::{ReadBuffer, WriteBuffer};
use crate::error::CodecError;

/// Read an unsigned value of `bits` that must equal `expected`.
pub fn read_const(
    src: &mut ReadBuffer,
    field: &'static str,
    bits: u8,
    expected: u64,
) -> Result<u64, CodecError> {
    let actual = src.read_unsigned(bits)?;
    if actual != expected {
        return Err(CodecError::ConstMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(actual)
}

#[inline]
pub fn write_const(dst: &mut WriteBuffer, bits: u8, value: u64) -> Result<(), CodecError> {
    dst.write_unsigned(bits, value)
}

/// Read a reserved field. A mismatch is logged and parsing continues.
pub fn read_reserved(
    src: &mut ReadBuffer,
    field: &'static str,
    bits: u8,
    expected: u64,
) -> Result<u64, CodecError> {
    let actual = src.read_unsigned(bits)?;
    if actual != expected {
        tracing::warn!(
            field,
            expected,
            actual,
            "reserved field did not carry its expected value"
        );
    }
    Ok(actual)
}

#[inline]
pub fn write_reserved(dst: &mut WriteBuffer, bits: u8, value: u64) -> Result<(), CodecError> {
    dst.write_unsigned(bits, value)
}

/// Read a discriminator. The caller matches on the value and returns
/// [`CodecError::unknown_discriminator`] from its fallback arm.
#[inline]
pub fn read_discriminator(src: &mut ReadBuffer, bits: u8) -> Result<u64, CodecError> {
    src.read_unsigned(bits)
}

/// Peek a discriminator without consuming it.
pub fn peek_discriminator(src: &ReadBuffer, bits: u8) -> Result<u64, CodecError> {
    let mut probe = src.clone();
    probe.read_unsigned(bits)
}

/// Read an integer code of `bits` and map it through `E::try_from`.
pub fn read_enum<E>(src: &mut ReadBuffer, type_name: &'static str, bits: u8) -> Result<E, CodecError>
where
    E: TryFrom<u64>,
{
    let raw = src.read_unsigned(bits)?;
    E::try_from(raw).map_err(|_| CodecError::UnknownEnumValue {
        type_name,
        value: raw,
    })
}

/// Fixed-count array.
pub fn read_array_count<T, F>(
    src: &mut ReadBuffer,
    count: usize,
    mut parse: F,
) -> Result<Vec<T>, CodecError>
where
    F: FnMut(&mut ReadBuffer, usize) -> Result<T, CodecError>,
{
    let mut out = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        out.push(parse(src, i)?);
    }
    Ok(out)
}

/// Array bounded by a byte length. The elements must consume exactly
/// `length` bytes.
pub fn read_array_length<T, F>(
    src: &mut ReadBuffer,
    length: usize,
    mut parse: F,
) -> Result<Vec<T>, CodecError>
where
    F: FnMut(&mut ReadBuffer) -> Result<T, CodecError>,
{
    let end = src.position() + length;
    if length > src.remaining() {
        return Err(CodecError::InsufficientData {
            needed: length * 8,
            available: src.remaining_bits(),
        });
    }
    let mut out = Vec::new();
    while src.position() < end {
        out.push(parse(src)?);
    }
    if src.position() != end {
        return Err(CodecError::decode(format!(
            "array overran its length bound: ended at {}, bound {end}",
            src.position()
        )));
    }
    Ok(out)
}

/// Array read until `done` returns true (checked before each element) or
/// the input is exhausted.
pub fn read_array_terminated<T, F, P>(
    src: &mut ReadBuffer,
    mut done: P,
    mut parse: F,
) -> Result<Vec<T>, CodecError>
where
    F: FnMut(&mut ReadBuffer) -> Result<T, CodecError>,
    P: FnMut(&ReadBuffer, &[T]) -> bool,
{
    let mut out = Vec::new();
    while src.has_more() && !done(src, &out) {
        out.push(parse(src)?);
    }
    Ok(out)
}

/// Speculatively parse an optional field.
///
/// On end-of-data or a parse-assert failure the cursor is rewound and
/// `None` is returned. Protocol errors still propagate.
pub fn read_optional<T, F>(src: &mut ReadBuffer, parse: F) -> Result<Option<T>, CodecError>
where
    F: FnOnce(&mut ReadBuffer) -> Result<T, CodecError>,
{
    if !src.has_more() {
        return Ok(None);
    }
    let mark = src.mark();
    match parse(src) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_parse_assert() => {
            src.reset(mark);
            Ok(None)
        }
        Err(e) => {
            src.reset(mark);
            Err(e)
        }
    }
}

/// Read a checksum of `bits` and verify it against `compute` applied to
/// the bytes `[from, current position)`.
pub fn read_checksum<F>(
    src: &mut ReadBuffer,
    field: &'static str,
    bits: u8,
    from: usize,
    compute: F,
) -> Result<u64, CodecError>
where
    F: FnOnce(&[u8]) -> u64,
{
    let covered = src.slice(from, src.position())?;
    let expected = compute(&covered);
    let actual = src.read_unsigned(bits)?;
    if actual != expected {
        return Err(CodecError::ChecksumMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(actual)
}

pub fn write_checksum<F>(
    dst: &mut WriteBuffer,
    bits: u8,
    from: usize,
    compute: F,
) -> Result<(), CodecError>
where
    F: FnOnce(&[u8]) -> u64,
{
    let value = compute(dst.written(from, dst.position()));
    dst.write_unsigned(bits, value)
}

/// Read an implicit field. The value is only used for bounds while
/// parsing and is never stored in the model.
#[inline]
pub fn read_implicit(src: &mut ReadBuffer, bits: u8) -> Result<u64, CodecError> {
    src.read_unsigned(bits)
}

/// Write an implicit field computed from other fields.
pub fn write_implicit(
    dst: &mut WriteBuffer,
    field: &'static str,
    bits: u8,
    value: usize,
) -> Result<(), CodecError> {
    let value = value as u64;
    if bits < 64 && value >> bits != 0 {
        return Err(CodecError::ValueOutOfRange { field });
    }
    dst.write_unsigned(bits, value)
}
