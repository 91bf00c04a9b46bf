//! Siemens S7 driver over ISO-on-TCP (RFC1006).
//!
//! A [`Connection`] runs the COTP and S7 setup handshake against a
//! [`Transport`](plclink_sdk::Transport), then serves batched reads and
//! writes of [`Tag`]s addressed with the textual S7 grammar:
//!
//! ```no_run
//! # async fn demo() -> plclink_s7::S7Result<()> {
//! use plclink_s7::{Connection, S7Config};
//! use plclink_sdk::TcpTransport;
//! use std::sync::Arc;
//!
//! let transport = Arc::new(TcpTransport::from_host("192.168.0.1", 102));
//! let connection = Connection::new(S7Config::default(), transport)?;
//! connection.connect().wait().await?;
//!
//! let response = connection
//!     .read_request_builder()
//!     .add_tag_address("speed", "%DB1.DBW0:INT")?
//!     .execute()
//!     .await?;
//! println!("{:?}", response.value("speed"));
//! # Ok(())
//! # }
//! ```

pub mod protocol;
pub mod types;

pub use protocol::{
    codec::{FrameErrorPolicy, TpktCodec},
    connection::{ConnectHandle, Connection, ConnectionState, DriverContext},
    frame::{ControllerType, MemoryArea, S7DataType},
    reader::{ReadRequestBuilder, ReadResponse, ReadResponseItem},
    tag::{Tag, TagHandler},
    tpdu::TpduGenerator,
    value::PlcValue,
    writer::{WriteRequestBuilder, WriteResponse, WriteResponseItem},
    ErrorCode, PlcResponseCode, S7Error, S7Result,
};
pub use types::{S7Config, TsapConfig};
