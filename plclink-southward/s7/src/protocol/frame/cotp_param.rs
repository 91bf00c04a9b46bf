use super::{CotpParameterType, CotpTpduSize};
use bytes::Bytes;
use plclink_sdk::{
    wire::field::{read_discriminator, read_enum, read_implicit, write_implicit},
    CodecError, ReadBuffer, WireDecode, WireEncode, WriteBuffer,
};

/// One entry of the COTP variable header part
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpParameter {
    TpduSize(CotpTpduSize),
    CallingTsap(u16),
    CalledTsap(u16),
    Checksum(u8),
    DisconnectAdditionalInformation(Bytes),
}

impl CotpParameter {
    pub fn parameter_type(&self) -> CotpParameterType {
        match self {
            CotpParameter::TpduSize(_) => CotpParameterType::TpduSize,
            CotpParameter::CallingTsap(_) => CotpParameterType::CallingTsap,
            CotpParameter::CalledTsap(_) => CotpParameterType::CalledTsap,
            CotpParameter::Checksum(_) => CotpParameterType::Checksum,
            CotpParameter::DisconnectAdditionalInformation(_) => {
                CotpParameterType::DisconnectAdditionalInformation
            }
        }
    }

    fn value_len(&self) -> usize {
        match self {
            CotpParameter::TpduSize(_) | CotpParameter::Checksum(_) => 1,
            CotpParameter::CallingTsap(_) | CotpParameter::CalledTsap(_) => 2,
            CotpParameter::DisconnectAdditionalInformation(data) => data.len(),
        }
    }
}

impl WireEncode for CotpParameter {
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        2 + self.value_len()
    }

    fn encode_to(&self, dst: &mut WriteBuffer, _ctx: &Self::Context) -> Result<(), CodecError> {
        dst.write_u8(8, self.parameter_type().code())?;
        write_implicit(dst, "parameterLength", 8, self.value_len())?;
        match self {
            CotpParameter::TpduSize(size) => dst.write_u8(8, size.code()),
            CotpParameter::CallingTsap(tsap) | CotpParameter::CalledTsap(tsap) => {
                dst.write_u16(16, *tsap)
            }
            CotpParameter::Checksum(crc) => dst.write_u8(8, *crc),
            CotpParameter::DisconnectAdditionalInformation(data) => dst.write_bytes(data),
        }
    }
}

impl WireDecode for CotpParameter {
    type Context = ();

    fn decode(src: &mut ReadBuffer, _ctx: &Self::Context) -> Result<Self, CodecError> {
        let kind = read_discriminator(src, 8)?;
        let len = read_implicit(src, 8)? as usize;
        let fixed = |expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(CodecError::decode(format!(
                    "COTP parameter {kind:#04x} announces {len} bytes, expected {expected}"
                )))
            }
        };
        match CotpParameterType::try_from(kind) {
            Ok(CotpParameterType::TpduSize) => {
                fixed(1)?;
                Ok(CotpParameter::TpduSize(read_enum(src, "CotpTpduSize", 8)?))
            }
            Ok(CotpParameterType::CallingTsap) => {
                fixed(2)?;
                Ok(CotpParameter::CallingTsap(src.read_u16(16)?))
            }
            Ok(CotpParameterType::CalledTsap) => {
                fixed(2)?;
                Ok(CotpParameter::CalledTsap(src.read_u16(16)?))
            }
            Ok(CotpParameterType::Checksum) => {
                fixed(1)?;
                Ok(CotpParameter::Checksum(src.read_u8(8)?))
            }
            Ok(CotpParameterType::DisconnectAdditionalInformation) => Ok(
                CotpParameter::DisconnectAdditionalInformation(src.read_bytes(len)?),
            ),
            Err(()) => Err(CodecError::unknown_discriminator("CotpParameter", kind)),
        }
    }
}
