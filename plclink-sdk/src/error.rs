use std::time::Duration;
use thiserror::Error;

/// Errors raised by the binary codec framework while reading or writing
/// wire structures.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input does not have enough bits to complete the operation
    #[error("insufficient data: needed {needed} bits, available {available} bits")]
    InsufficientData { needed: usize, available: usize },

    /// A constant field did not carry its fixed value
    #[error("const field '{field}' mismatch: expected {expected:#x}, got {actual:#x}")]
    ConstMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    /// Checksum verification failed
    #[error("checksum '{field}' mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    /// A discriminator selected no known sub-type
    #[error("unknown discriminator {value:#x} for type {type_name}")]
    UnknownDiscriminator { type_name: &'static str, value: u64 },

    /// An enum code has no symbolic mapping
    #[error("unknown value {value:#x} for enum {type_name}")]
    UnknownEnumValue { type_name: &'static str, value: u64 },

    /// A value does not fit the declared bit width or bound
    #[error("value out of range for field '{field}'")]
    ValueOutOfRange { field: &'static str },

    #[error("encode error: {context}")]
    Encode { context: String },

    #[error("decode error: {context}")]
    Decode { context: String },
}

impl CodecError {
    /// Parse-assert failures abort the current frame only.
    ///
    /// Every other variant is a protocol level problem or an I/O failure.
    pub fn is_parse_assert(&self) -> bool {
        matches!(
            self,
            CodecError::ConstMismatch { .. }
                | CodecError::ChecksumMismatch { .. }
                | CodecError::InsufficientData { .. }
        )
    }

    #[inline]
    pub fn unknown_discriminator(type_name: &'static str, value: impl Into<u64>) -> Self {
        CodecError::UnknownDiscriminator {
            type_name,
            value: value.into(),
        }
    }

    #[inline]
    pub fn decode(context: impl Into<String>) -> Self {
        CodecError::Decode {
            context: context.into(),
        }
    }

    #[inline]
    pub fn encode(context: impl Into<String>) -> Self {
        CodecError::Encode {
            context: context.into(),
        }
    }
}

/// Errors surfaced by the driver plumbing (transport, message codec,
/// transaction manager).
#[derive(Error, Debug)]
pub enum SpiError {
    /// Fatal transport failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Expectation TTL elapsed
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("shutting down")]
    ShuttingDown,

    /// An expectation handler rejected the matched message
    #[error("handler error: {0}")]
    Handler(String),
}

impl SpiError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SpiError::Timeout(_))
    }
}
