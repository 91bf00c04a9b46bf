use super::{CotpParameter, CotpProtocolClass, CotpTpduSize, CotpType, S7Message};
use plclink_sdk::{
    wire::field::{read_array_length, read_discriminator, read_enum, read_implicit, write_implicit},
    CodecError, ReadBuffer, WireDecode, WireEncode, WriteBuffer,
};

/// Fixed part of a COTP TPDU, selected by the TPDU code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpTpdu {
    Data {
        eot: bool,
        tpdu_ref: u8,
    },
    ConnectionRequest {
        dst_ref: u16,
        src_ref: u16,
        class: CotpProtocolClass,
    },
    ConnectionResponse {
        dst_ref: u16,
        src_ref: u16,
        class: CotpProtocolClass,
    },
    DisconnectRequest {
        dst_ref: u16,
        src_ref: u16,
        class: CotpProtocolClass,
    },
    DisconnectResponse {
        dst_ref: u16,
        src_ref: u16,
    },
    TpduError {
        dst_ref: u16,
        reject_cause: u8,
    },
}

impl CotpTpdu {
    pub fn tpdu_code(&self) -> CotpType {
        match self {
            CotpTpdu::Data { .. } => CotpType::D,
            CotpTpdu::ConnectionRequest { .. } => CotpType::Cr,
            CotpTpdu::ConnectionResponse { .. } => CotpType::Cc,
            CotpTpdu::DisconnectRequest { .. } => CotpType::Dr,
            CotpTpdu::DisconnectResponse { .. } => CotpType::Dc,
            CotpTpdu::TpduError { .. } => CotpType::Er,
        }
    }

    fn fixed_len(&self) -> usize {
        match self {
            CotpTpdu::Data { .. } => 1,
            CotpTpdu::ConnectionRequest { .. }
            | CotpTpdu::ConnectionResponse { .. }
            | CotpTpdu::DisconnectRequest { .. } => 5,
            CotpTpdu::DisconnectResponse { .. } => 4,
            CotpTpdu::TpduError { .. } => 3,
        }
    }
}

/// COTP (ISO 8073) TPDU with its variable parameters and optional S7 payload
#[derive(Debug, Clone, PartialEq)]
pub struct CotpPacket {
    pub tpdu: CotpTpdu,
    pub parameters: Vec<CotpParameter>,
    pub payload: Option<S7Message>,
}

impl CotpPacket {
    /// Data TPDU carrying one complete S7 message.
    pub fn data(tpdu_ref: u8, message: S7Message) -> Self {
        Self {
            tpdu: CotpTpdu::Data {
                eot: true,
                tpdu_ref,
            },
            parameters: Vec::new(),
            payload: Some(message),
        }
    }

    /// Connection request as sent by the active side.
    pub fn connection_request(calling_tsap: u16, called_tsap: u16, tpdu_size: CotpTpduSize) -> Self {
        Self {
            tpdu: CotpTpdu::ConnectionRequest {
                dst_ref: 0x0000,
                src_ref: 0x000F,
                class: CotpProtocolClass::Class0,
            },
            parameters: vec![
                CotpParameter::CallingTsap(calling_tsap),
                CotpParameter::CalledTsap(called_tsap),
                CotpParameter::TpduSize(tpdu_size),
            ],
            payload: None,
        }
    }

    /// Bytes between the length indicator and the payload.
    fn header_len(&self) -> usize {
        1 + self.tpdu.fixed_len()
            + self
                .parameters
                .iter()
                .map(|p| p.encoded_len(&()))
                .sum::<usize>()
    }

    pub fn tpdu_size(&self) -> Option<CotpTpduSize> {
        self.parameters.iter().find_map(|p| match p {
            CotpParameter::TpduSize(size) => Some(*size),
            _ => None,
        })
    }

    pub fn calling_tsap(&self) -> Option<u16> {
        self.parameters.iter().find_map(|p| match p {
            CotpParameter::CallingTsap(t) => Some(*t),
            _ => None,
        })
    }

    pub fn called_tsap(&self) -> Option<u16> {
        self.parameters.iter().find_map(|p| match p {
            CotpParameter::CalledTsap(t) => Some(*t),
            _ => None,
        })
    }
}

impl WireEncode for CotpPacket {
    type Context = ();

    fn encoded_len(&self, ctx: &Self::Context) -> usize {
        1 + self.header_len() + self.payload.as_ref().map_or(0, |m| m.encoded_len(ctx))
    }

    fn encode_to(&self, dst: &mut WriteBuffer, ctx: &Self::Context) -> Result<(), CodecError> {
        write_implicit(dst, "headerLength", 8, self.header_len())?;
        dst.write_u8(8, self.tpdu.tpdu_code().code())?;
        match &self.tpdu {
            CotpTpdu::Data { eot, tpdu_ref } => {
                dst.write_bit(*eot)?;
                dst.write_u8(7, *tpdu_ref)?;
            }
            CotpTpdu::ConnectionRequest {
                dst_ref,
                src_ref,
                class,
            }
            | CotpTpdu::ConnectionResponse {
                dst_ref,
                src_ref,
                class,
            }
            | CotpTpdu::DisconnectRequest {
                dst_ref,
                src_ref,
                class,
            } => {
                dst.write_u16(16, *dst_ref)?;
                dst.write_u16(16, *src_ref)?;
                dst.write_u8(8, class.code())?;
            }
            CotpTpdu::DisconnectResponse { dst_ref, src_ref } => {
                dst.write_u16(16, *dst_ref)?;
                dst.write_u16(16, *src_ref)?;
            }
            CotpTpdu::TpduError {
                dst_ref,
                reject_cause,
            } => {
                dst.write_u16(16, *dst_ref)?;
                dst.write_u8(8, *reject_cause)?;
            }
        }
        for p in &self.parameters {
            p.encode_to(dst, ctx)?;
        }
        if let Some(message) = &self.payload {
            message.encode_to(dst, ctx)?;
        }
        Ok(())
    }
}

impl WireDecode for CotpPacket {
    /// Number of bytes the TPKT header assigns to this packet
    type Context = usize;

    fn decode(src: &mut ReadBuffer, cotp_len: &Self::Context) -> Result<Self, CodecError> {
        let start = src.position();
        let header_len = read_implicit(src, 8)? as usize;
        let code = read_discriminator(src, 8)?;
        let refs = |src: &mut ReadBuffer| -> Result<(u16, u16), CodecError> {
            Ok((src.read_u16(16)?, src.read_u16(16)?))
        };
        let tpdu = match CotpType::try_from(code) {
            Ok(CotpType::D) => CotpTpdu::Data {
                eot: src.read_bit()?,
                tpdu_ref: src.read_u8(7)?,
            },
            Ok(CotpType::Cr) => {
                let (dst_ref, src_ref) = refs(src)?;
                CotpTpdu::ConnectionRequest {
                    dst_ref,
                    src_ref,
                    class: read_enum(src, "CotpProtocolClass", 8)?,
                }
            }
            Ok(CotpType::Cc) => {
                let (dst_ref, src_ref) = refs(src)?;
                CotpTpdu::ConnectionResponse {
                    dst_ref,
                    src_ref,
                    class: read_enum(src, "CotpProtocolClass", 8)?,
                }
            }
            Ok(CotpType::Dr) => {
                let (dst_ref, src_ref) = refs(src)?;
                CotpTpdu::DisconnectRequest {
                    dst_ref,
                    src_ref,
                    class: read_enum(src, "CotpProtocolClass", 8)?,
                }
            }
            Ok(CotpType::Dc) => {
                let (dst_ref, src_ref) = refs(src)?;
                CotpTpdu::DisconnectResponse { dst_ref, src_ref }
            }
            Ok(CotpType::Er) => CotpTpdu::TpduError {
                dst_ref: src.read_u16(16)?,
                reject_cause: src.read_u8(8)?,
            },
            Err(()) => return Err(CodecError::unknown_discriminator("CotpPacket", code)),
        };

        let header_end = start + 1 + header_len;
        let consumed = src.position();
        if header_end < consumed {
            return Err(CodecError::decode(format!(
                "COTP header length {header_len} shorter than its fixed part"
            )));
        }
        let parameters = read_array_length(src, header_end - consumed, |b| {
            CotpParameter::decode(b, &())
        })?;

        let payload = if src.position() - start < *cotp_len {
            Some(S7Message::decode(src, &())?)
        } else {
            None
        };

        Ok(Self {
            tpdu,
            parameters,
            payload,
        })
    }
}
