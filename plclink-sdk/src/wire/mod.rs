mod buffer;
pub mod field;

pub use buffer::{Mark, ReadBuffer, StringEncoding, WriteBuffer};

use crate::error::CodecError;
use bytes::Bytes;

/// Unified wire encoding trait across layers
pub trait WireEncode {
    type Context;

    /// Exact serialized size in bytes, computed from the fields alone.
    fn encoded_len(&self, ctx: &Self::Context) -> usize;

    fn encode_to(&self, dst: &mut WriteBuffer, ctx: &Self::Context) -> Result<(), CodecError>;

    /// Serialize into a buffer sized by [`WireEncode::encoded_len`].
    ///
    /// Fails if the written size disagrees with the computed one.
    fn to_bytes(&self, ctx: &Self::Context) -> Result<Bytes, CodecError> {
        let expected = self.encoded_len(ctx);
        let mut dst = WriteBuffer::with_capacity(expected);
        self.encode_to(&mut dst, ctx)?;
        let written = dst.position();
        if written != expected {
            return Err(CodecError::encode(format!(
                "length mismatch: computed {expected} bytes, wrote {written}"
            )));
        }
        Ok(dst.into_bytes())
    }
}

/// Unified wire decoding trait across layers
pub trait WireDecode: Sized {
    type Context;

    fn decode(src: &mut ReadBuffer, ctx: &Self::Context) -> Result<Self, CodecError>;

    fn from_bytes(data: Bytes, ctx: &Self::Context) -> Result<Self, CodecError> {
        let mut src = ReadBuffer::new(data);
        Self::decode(&mut src, ctx)
    }
}
