use super::{CotpPacket, CotpTpdu, S7Message};
use plclink_sdk::{
    wire::field::{read_const, read_implicit, read_reserved, write_implicit},
    CodecError, ReadBuffer, WireDecode, WireEncode, WriteBuffer,
};

pub(crate) const TPKT_VERSION: u8 = 0x03;
pub(crate) const TPKT_HEADER_LEN: usize = 4;

/// TPKT (RFC1006) frame wrapping one COTP packet
#[derive(Debug, Clone, PartialEq)]
pub struct TpktPacket {
    pub payload: CotpPacket,
}

impl TpktPacket {
    #[inline]
    pub fn new(payload: CotpPacket) -> Self {
        Self { payload }
    }

    /// Data TPDU frame carrying `message`.
    pub fn data(tpdu_ref: u8, message: S7Message) -> Self {
        Self::new(CotpPacket::data(tpdu_ref, message))
    }

    /// The S7 message of a COTP Data TPDU, if any.
    pub fn s7_message(&self) -> Option<&S7Message> {
        match self.payload.tpdu {
            CotpTpdu::Data { .. } => self.payload.payload.as_ref(),
            _ => None,
        }
    }

    pub fn into_s7_message(self) -> Option<S7Message> {
        match self.payload.tpdu {
            CotpTpdu::Data { .. } => self.payload.payload,
            _ => None,
        }
    }
}

impl WireEncode for TpktPacket {
    type Context = ();

    fn encoded_len(&self, ctx: &Self::Context) -> usize {
        TPKT_HEADER_LEN + self.payload.encoded_len(ctx)
    }

    fn encode_to(&self, dst: &mut WriteBuffer, ctx: &Self::Context) -> Result<(), CodecError> {
        dst.write_u8(8, TPKT_VERSION)?;
        dst.write_u8(8, 0x00)?;
        write_implicit(dst, "len", 16, self.encoded_len(ctx))?;
        self.payload.encode_to(dst, ctx)
    }
}

impl WireDecode for TpktPacket {
    type Context = ();

    fn decode(src: &mut ReadBuffer, _ctx: &Self::Context) -> Result<Self, CodecError> {
        read_const(src, "protocolId", 8, u64::from(TPKT_VERSION))?;
        read_reserved(src, "reserved", 8, 0x00)?;
        let len = read_implicit(src, 16)? as usize;
        if len < TPKT_HEADER_LEN {
            return Err(CodecError::decode(format!("TPKT length {len} below header size")));
        }
        let payload = CotpPacket::decode(src, &(len - TPKT_HEADER_LEN))?;
        Ok(Self { payload })
    }
}
