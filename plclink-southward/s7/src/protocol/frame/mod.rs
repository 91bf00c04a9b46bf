//! Wire model of the ISO-on-TCP stack: TPKT, COTP and S7 PDUs.
//!
//! Every structure implements [`plclink_sdk::WireEncode`] and
//! [`plclink_sdk::WireDecode`]. Implicit fields (lengths, counts) are
//! computed while encoding and only used as bounds while decoding.

mod cotp;
mod cotp_param;
mod message;
mod param;
mod payload;
mod tpkt;
mod tsap;
mod types;

pub use cotp::{CotpPacket, CotpTpdu};
pub use cotp_param::CotpParameter;
pub use message::{S7Message, S7MessageKind};
pub use param::{CpuFunctionParameter, CpuFunctionResponseInfo, S7Address, S7AnyAddress, S7Parameter};
pub use payload::{
    S7Payload, S7VarPayloadDataItem, SzlDataTreeItem, SzlId, UserDataPayloadBody,
    UserDataPayloadItem,
};
pub use tpkt::TpktPacket;
pub(crate) use tpkt::{TPKT_HEADER_LEN, TPKT_VERSION};
pub use tsap::{default_tsap_pair, Tsap, TsapPair};
pub(crate) use tsap::validate_rack_slot;
pub use types::{
    ControllerType, CotpParameterType, CotpProtocolClass, CotpTpduSize, CotpType,
    DataTransportErrorCode, DataTransportSize, DeviceGroup, MemoryArea, S7DataType,
    S7MessageType, S7ParameterType, S7TransportSize, SzlModuleTypeClass, SzlSublist,
};
