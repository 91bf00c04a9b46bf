mod codec;
mod error;
mod logging;
mod transaction;
pub mod transport;
pub mod wire;

pub use codec::{Expectation, FrameCodec, MessageCodec, MessageCodecConfig};
pub use error::{CodecError, SpiError};
pub use logging::{init_logging, LogConfig};
pub use transaction::{RequestTransaction, RequestTransactionManager};
pub use transport::{BoxedIo, DuplexAcceptor, DuplexTransport, TcpTransport, TcpTransportConfig, Transport};
pub use wire::{ReadBuffer, StringEncoding, WireDecode, WireEncode, WriteBuffer};

pub type SpiResult<T> = Result<T, SpiError>;
pub type CodecResult<T> = Result<T, CodecError>;
