use plclink_sdk::{CodecError, SpiError};
use std::result::Result as StdResult;
use thiserror::Error as ThisError;

/// Unified S7 result type
pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Spi(#[from] SpiError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connect timeout")]
    ErrConnectTimeout,

    #[error("unexpected PDU or function")]
    ErrUnexpectedPdu,

    #[error("invalid address: {0}")]
    ErrInvalidAddress(String),

    #[error("invalid value for tag '{tag}': {reason}")]
    ErrInvalidValue { tag: String, reason: String },

    #[error("session is not active")]
    ErrNotActive,

    #[error("response carries {actual} items, request had {expected}")]
    ErrItemCountMismatch { expected: usize, actual: usize },

    #[error("controller identification failed: {0}")]
    ErrIdentification(&'static str),

    #[error("invalid configuration for: {0}")]
    InvalidConfiguration(&'static str),

    /// Feature or PDU type is recognized but not supported by this implementation
    #[error("unsupported feature: {feature}")]
    UnsupportedFeature { feature: &'static str },

    /// Header-level error reported by the PLC in a Response/ResponseData PDU.
    #[allow(clippy::enum_variant_names)]
    #[error("S7 error: {code:?} (class {class:#04x}, code {raw:#04x})")]
    S7Error { class: u8, raw: u8, code: ErrorCode },

    /// TSAP-specific: Rack value is out of allowed range (0..=15)
    #[error("Rack value {0} is out of range (0..=15)")]
    InvalidRack(u8),

    /// TSAP-specific: Slot value is out of allowed range (0..=15)
    #[error("Slot value {0} is out of range (0..=15)")]
    InvalidSlot(u8),
}

impl Error {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ErrConnectTimeout) || matches!(self, Error::Spi(e) if e.is_timeout())
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Spi(SpiError::Cancelled))
    }

    pub(crate) fn header(class: u8, raw: u8) -> Self {
        Error::S7Error {
            class,
            raw,
            code: ErrorCode::from_class_and_code(class, raw),
        }
    }
}

/// Header error class and code combined as `class << 8 | code`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0x0000,
    /// The service cannot run while the block is in its current state
    ServiceNotAllowedInCurrentState = 0x8001,
    /// Error while transferring a block
    BlockTransferProtocolError = 0x8003,
    /// Service unknown to the remote module
    UnknownServiceOnRemoteModule = 0x8100,
    ServiceNotImplementedOrFrameError = 0x8104,
    ObjectTypeMismatch = 0x8204,
    CopiedBlockExistsUnlinked = 0x8205,
    MemoryOrStorageUnavailable = 0x8301,
    ResourcesInsufficientOrCpuBusy = 0x8302,
    ParallelUploadNotPossible = 0x8304,
    FunctionUnavailable = 0x8305,
    WorkMemoryInsufficient = 0x8306,
    RetentiveMemoryInsufficient = 0x8307,
    InvalidServiceSequence = 0x8401,
    ServiceBlockedByObjectState = 0x8402,
    FunctionCannotBeExecuted = 0x8404,
    RemoteBlockDisabled = 0x8405,
    FrameError = 0x8500,
    /// Module alarm: service aborted early
    ServiceAbortedEarly = 0x8503,
    /// Addressing error on the partner object, e.g. wrong area length
    ObjectAddressingError = 0x8701,
    ServiceNotSupportedByModule = 0x8702,
    ObjectAccessDenied = 0x8703,
    ObjectCorrupted = 0x8704,
    Unknown = 0xFFFF,
}

impl ErrorCode {
    pub fn from_class_and_code(class: u8, code: u8) -> Self {
        use ErrorCode::*;
        match (u16::from(class) << 8) | u16::from(code) {
            0x0000 => Success,
            0x8001 => ServiceNotAllowedInCurrentState,
            0x8003 => BlockTransferProtocolError,
            0x8100 => UnknownServiceOnRemoteModule,
            0x8104 => ServiceNotImplementedOrFrameError,
            0x8204 => ObjectTypeMismatch,
            0x8205 => CopiedBlockExistsUnlinked,
            0x8301 => MemoryOrStorageUnavailable,
            0x8302 => ResourcesInsufficientOrCpuBusy,
            0x8304 => ParallelUploadNotPossible,
            0x8305 => FunctionUnavailable,
            0x8306 => WorkMemoryInsufficient,
            0x8307 => RetentiveMemoryInsufficient,
            0x8401 => InvalidServiceSequence,
            0x8402 => ServiceBlockedByObjectState,
            0x8404 => FunctionCannotBeExecuted,
            0x8405 => RemoteBlockDisabled,
            0x8500 => FrameError,
            0x8503 => ServiceAbortedEarly,
            0x8701 => ObjectAddressingError,
            0x8702 => ServiceNotSupportedByModule,
            0x8703 => ObjectAccessDenied,
            0x8704 => ObjectCorrupted,
            _ => Unknown,
        }
    }
}

/// Outcome of one tag within a read or write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlcResponseCode {
    Ok,
    NotFound,
    AccessDenied,
    InvalidAddress,
    InvalidDatatype,
    InvalidData,
    InternalError,
    RemoteBusy,
    RemoteError,
    Unsupported,
    ResponsePending,
}

impl From<crate::protocol::frame::DataTransportErrorCode> for PlcResponseCode {
    fn from(code: crate::protocol::frame::DataTransportErrorCode) -> Self {
        use crate::protocol::frame::DataTransportErrorCode as C;
        match code {
            C::Ok => PlcResponseCode::Ok,
            C::NotFound => PlcResponseCode::NotFound,
            C::DataTypeNotSupported => PlcResponseCode::InvalidDatatype,
            C::InvalidAddress => PlcResponseCode::InvalidAddress,
            C::AccessDenied => PlcResponseCode::AccessDenied,
            C::Reserved => PlcResponseCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::DataTransportErrorCode;

    #[test]
    fn header_codes_are_combined() {
        assert_eq!(
            ErrorCode::from_class_and_code(0x81, 0x04),
            ErrorCode::ServiceNotImplementedOrFrameError
        );
        assert_eq!(ErrorCode::from_class_and_code(0x87, 0x03), ErrorCode::ObjectAccessDenied);
        assert_eq!(ErrorCode::from_class_and_code(0x99, 0x99), ErrorCode::Unknown);
    }

    #[test]
    fn item_codes_map_to_response_codes() {
        assert_eq!(
            PlcResponseCode::from(DataTransportErrorCode::DataTypeNotSupported),
            PlcResponseCode::InvalidDatatype
        );
        assert_eq!(
            PlcResponseCode::from(DataTransportErrorCode::Reserved),
            PlcResponseCode::InternalError
        );
    }
}
