use super::{MemoryArea, S7MessageType, S7ParameterType, S7TransportSize};
use plclink_sdk::{
    wire::field::{
        read_array_count, read_const, read_discriminator, read_enum, read_implicit,
        read_reserved, write_implicit,
    },
    CodecError, ReadBuffer, WireDecode, WireEncode, WriteBuffer,
};

const VAR_ITEM_TYPE: u64 = 0x12;
const USER_DATA_ITEM_TYPE: u64 = 0x12;
const ADDRESS_ANY: u64 = 0x10;

/// S7-Any pointer used by ReadVar/WriteVar request items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7AnyAddress {
    pub transport_size: S7TransportSize,
    pub number_of_elements: u16,
    pub db_number: u16,
    pub area: MemoryArea,
    /// 21-bit byte offset
    pub byte_address: u32,
    pub bit_address: u8,
}

/// Address of one variable item, selected by the syntax id byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Address {
    Any(S7AnyAddress),
}

impl S7Address {
    pub fn any(
        transport_size: S7TransportSize,
        number_of_elements: u16,
        db_number: u16,
        area: MemoryArea,
        byte_address: u32,
        bit_address: u8,
    ) -> Self {
        S7Address::Any(S7AnyAddress {
            transport_size,
            number_of_elements,
            db_number,
            area,
            byte_address,
            bit_address,
        })
    }
}

impl WireEncode for S7Address {
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        10
    }

    fn encode_to(&self, dst: &mut WriteBuffer, _ctx: &Self::Context) -> Result<(), CodecError> {
        match self {
            S7Address::Any(a) => {
                dst.write_u8(8, ADDRESS_ANY as u8)?;
                dst.write_u8(8, a.transport_size.code())?;
                dst.write_u16(16, a.number_of_elements)?;
                dst.write_u16(16, a.db_number)?;
                dst.write_u8(8, a.area.code())?;
                dst.write_u32(21, a.byte_address)
                    .map_err(|_| CodecError::ValueOutOfRange { field: "byteAddress" })?;
                dst.write_u8(3, a.bit_address)
                    .map_err(|_| CodecError::ValueOutOfRange { field: "bitAddress" })
            }
        }
    }
}

impl WireDecode for S7Address {
    type Context = ();

    fn decode(src: &mut ReadBuffer, _ctx: &Self::Context) -> Result<Self, CodecError> {
        match read_discriminator(src, 8)? {
            ADDRESS_ANY => Ok(S7Address::Any(S7AnyAddress {
                transport_size: read_enum(src, "S7TransportSize", 8)?,
                number_of_elements: src.read_u16(16)?,
                db_number: src.read_u16(16)?,
                area: read_enum(src, "MemoryArea", 8)?,
                byte_address: src.read_u32(21)?,
                bit_address: src.read_u8(3)?,
            })),
            other => Err(CodecError::unknown_discriminator("S7Address", other)),
        }
    }
}

fn encode_var_item(address: &S7Address, dst: &mut WriteBuffer) -> Result<(), CodecError> {
    dst.write_u8(8, VAR_ITEM_TYPE as u8)?;
    write_implicit(dst, "itemLength", 8, address.encoded_len(&()))?;
    address.encode_to(dst, &())
}

fn decode_var_item(src: &mut ReadBuffer) -> Result<S7Address, CodecError> {
    read_const(src, "itemType", 8, VAR_ITEM_TYPE)?;
    let len = read_implicit(src, 8)? as usize;
    let mut section = ReadBuffer::new(src.read_bytes(len)?);
    S7Address::decode(&mut section, &())
}

/// Extra header fields present in CPU-function responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuFunctionResponseInfo {
    pub data_unit_reference_number: u8,
    pub last_data_unit: u8,
    pub error_code: u16,
}

/// UserData parameter item for CPU functions (SZL reads and friends)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuFunctionParameter {
    pub method: u8,
    /// 4 bits: 0x4 request, 0x8 response
    pub function_type: u8,
    /// 4 bits
    pub function_group: u8,
    pub subfunction: u8,
    pub sequence_number: u8,
    pub response: Option<CpuFunctionResponseInfo>,
}

impl CpuFunctionParameter {
    fn body_len(&self) -> usize {
        if self.response.is_some() {
            8
        } else {
            4
        }
    }
}

impl WireEncode for CpuFunctionParameter {
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        2 + self.body_len()
    }

    fn encode_to(&self, dst: &mut WriteBuffer, _ctx: &Self::Context) -> Result<(), CodecError> {
        dst.write_u8(8, USER_DATA_ITEM_TYPE as u8)?;
        write_implicit(dst, "itemLength", 8, self.body_len())?;
        dst.write_u8(8, self.method)?;
        dst.write_u8(4, self.function_type)?;
        dst.write_u8(4, self.function_group)?;
        dst.write_u8(8, self.subfunction)?;
        dst.write_u8(8, self.sequence_number)?;
        if let Some(info) = &self.response {
            dst.write_u8(8, info.data_unit_reference_number)?;
            dst.write_u8(8, info.last_data_unit)?;
            dst.write_u16(16, info.error_code)?;
        }
        Ok(())
    }
}

impl WireDecode for CpuFunctionParameter {
    type Context = ();

    fn decode(src: &mut ReadBuffer, _ctx: &Self::Context) -> Result<Self, CodecError> {
        let item_type = read_discriminator(src, 8)?;
        if item_type != USER_DATA_ITEM_TYPE {
            return Err(CodecError::unknown_discriminator(
                "S7ParameterUserDataItem",
                item_type,
            ));
        }
        let len = read_implicit(src, 8)? as usize;
        let method = src.read_u8(8)?;
        let function_type = src.read_u8(4)?;
        let function_group = src.read_u8(4)?;
        let subfunction = src.read_u8(8)?;
        let sequence_number = src.read_u8(8)?;
        let response = match len {
            4 => None,
            8 => Some(CpuFunctionResponseInfo {
                data_unit_reference_number: src.read_u8(8)?,
                last_data_unit: src.read_u8(8)?,
                error_code: src.read_u16(16)?,
            }),
            other => {
                return Err(CodecError::decode(format!(
                    "CPU function parameter length {other} is neither 4 nor 8"
                )))
            }
        };
        Ok(Self {
            method,
            function_type,
            function_group,
            subfunction,
            sequence_number,
            response,
        })
    }
}

/// Parameter section, selected by function code and message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7Parameter {
    SetupCommunication {
        max_amq_caller: u16,
        max_amq_callee: u16,
        pdu_length: u16,
    },
    ReadVarRequest {
        items: Vec<S7Address>,
    },
    ReadVarResponse {
        num_items: u8,
    },
    WriteVarRequest {
        items: Vec<S7Address>,
    },
    WriteVarResponse {
        num_items: u8,
    },
    UserData {
        items: Vec<CpuFunctionParameter>,
    },
}

impl S7Parameter {
    pub fn parameter_type(&self) -> S7ParameterType {
        match self {
            S7Parameter::SetupCommunication { .. } => S7ParameterType::SetupCommunication,
            S7Parameter::ReadVarRequest { .. } | S7Parameter::ReadVarResponse { .. } => {
                S7ParameterType::ReadVar
            }
            S7Parameter::WriteVarRequest { .. } | S7Parameter::WriteVarResponse { .. } => {
                S7ParameterType::WriteVar
            }
            S7Parameter::UserData { .. } => S7ParameterType::UserData,
        }
    }
}

impl WireEncode for S7Parameter {
    type Context = ();

    fn encoded_len(&self, ctx: &Self::Context) -> usize {
        match self {
            S7Parameter::SetupCommunication { .. } => 8,
            S7Parameter::ReadVarRequest { items } | S7Parameter::WriteVarRequest { items } => {
                2 + items.iter().map(|a| 2 + a.encoded_len(ctx)).sum::<usize>()
            }
            S7Parameter::ReadVarResponse { .. } | S7Parameter::WriteVarResponse { .. } => 2,
            S7Parameter::UserData { items } => {
                2 + items.iter().map(|i| i.encoded_len(ctx)).sum::<usize>()
            }
        }
    }

    fn encode_to(&self, dst: &mut WriteBuffer, ctx: &Self::Context) -> Result<(), CodecError> {
        dst.write_u8(8, self.parameter_type().code())?;
        match self {
            S7Parameter::SetupCommunication {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            } => {
                dst.write_u8(8, 0x00)?;
                dst.write_u16(16, *max_amq_caller)?;
                dst.write_u16(16, *max_amq_callee)?;
                dst.write_u16(16, *pdu_length)
            }
            S7Parameter::ReadVarRequest { items } | S7Parameter::WriteVarRequest { items } => {
                write_implicit(dst, "numItems", 8, items.len())?;
                items.iter().try_for_each(|a| encode_var_item(a, dst))
            }
            S7Parameter::ReadVarResponse { num_items }
            | S7Parameter::WriteVarResponse { num_items } => dst.write_u8(8, *num_items),
            S7Parameter::UserData { items } => {
                write_implicit(dst, "numItems", 8, items.len())?;
                items.iter().try_for_each(|i| i.encode_to(dst, ctx))
            }
        }
    }
}

impl WireDecode for S7Parameter {
    type Context = S7MessageType;

    fn decode(src: &mut ReadBuffer, message_type: &Self::Context) -> Result<Self, CodecError> {
        let raw = read_discriminator(src, 8)?;
        let parameter_type = S7ParameterType::try_from(raw)
            .map_err(|_| CodecError::unknown_discriminator("S7Parameter", raw))?;
        let is_request = *message_type == S7MessageType::Request;
        let is_response = matches!(
            message_type,
            S7MessageType::Response | S7MessageType::ResponseData
        );
        match parameter_type {
            S7ParameterType::SetupCommunication => {
                read_reserved(src, "reserved", 8, 0x00)?;
                Ok(S7Parameter::SetupCommunication {
                    max_amq_caller: src.read_u16(16)?,
                    max_amq_callee: src.read_u16(16)?,
                    pdu_length: src.read_u16(16)?,
                })
            }
            S7ParameterType::ReadVar if is_request => {
                let count = read_implicit(src, 8)? as usize;
                Ok(S7Parameter::ReadVarRequest {
                    items: read_array_count(src, count, |b, _| decode_var_item(b))?,
                })
            }
            S7ParameterType::ReadVar if is_response => Ok(S7Parameter::ReadVarResponse {
                num_items: src.read_u8(8)?,
            }),
            S7ParameterType::WriteVar if is_request => {
                let count = read_implicit(src, 8)? as usize;
                Ok(S7Parameter::WriteVarRequest {
                    items: read_array_count(src, count, |b, _| decode_var_item(b))?,
                })
            }
            S7ParameterType::WriteVar if is_response => Ok(S7Parameter::WriteVarResponse {
                num_items: src.read_u8(8)?,
            }),
            S7ParameterType::UserData if *message_type == S7MessageType::UserData => {
                let count = read_implicit(src, 8)? as usize;
                Ok(S7Parameter::UserData {
                    items: read_array_count(src, count, |b, _| CpuFunctionParameter::decode(b, &()))?,
                })
            }
            _ => Err(CodecError::unknown_discriminator(
                "S7Parameter",
                (raw << 8) | u64::from(message_type.code()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_address_layout() {
        let addr = S7Address::any(S7TransportSize::Bit, 1, 1, MemoryArea::DataBlocks, 5, 3);
        let bytes = addr.to_bytes(&()).unwrap();
        assert_eq!(
            &bytes[..],
            &[0x10, 0x01, 0x00, 0x01, 0x00, 0x01, 0x84, 0x00, 0x00, 0x2B]
        );
        assert_eq!(S7Address::from_bytes(bytes, &()).unwrap(), addr);
    }

    #[test]
    fn byte_address_uses_21_bits() {
        let addr = S7Address::any(
            S7TransportSize::Byte,
            1,
            0,
            MemoryArea::FlagsMarkers,
            2_097_151,
            0,
        );
        let bytes = addr.to_bytes(&()).unwrap();
        assert_eq!(&bytes[7..], &[0xFF, 0xFF, 0xF8]);
        let too_far = S7Address::any(
            S7TransportSize::Byte,
            1,
            0,
            MemoryArea::FlagsMarkers,
            2_097_152,
            0,
        );
        assert!(too_far.to_bytes(&()).is_err());
    }

    #[test]
    fn identify_parameter_layout() {
        let param = S7Parameter::UserData {
            items: vec![CpuFunctionParameter {
                method: 0x11,
                function_type: 0x4,
                function_group: 0x4,
                subfunction: 0x01,
                sequence_number: 0x00,
                response: None,
            }],
        };
        let bytes = param.to_bytes(&()).unwrap();
        assert_eq!(&bytes[..], &[0x00, 0x01, 0x12, 0x04, 0x11, 0x44, 0x01, 0x00]);
        let back =
            S7Parameter::decode(&mut ReadBuffer::new(bytes), &S7MessageType::UserData).unwrap();
        assert_eq!(back, param);
    }

    #[test]
    fn parameter_choice_depends_on_message_type() {
        let bytes = bytes::Bytes::from_static(&[0x04, 0x01]);
        let resp =
            S7Parameter::decode(&mut ReadBuffer::new(bytes.clone()), &S7MessageType::ResponseData)
                .unwrap();
        assert_eq!(resp, S7Parameter::ReadVarResponse { num_items: 1 });
        let err = S7Parameter::decode(&mut ReadBuffer::new(bytes), &S7MessageType::UserData)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownDiscriminator { .. }));
    }
}
