pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod reader;
pub mod tag;
pub mod tpdu;
pub mod value;
pub mod writer;

pub use error::{Error as S7Error, ErrorCode, PlcResponseCode, Result as S7Result};
