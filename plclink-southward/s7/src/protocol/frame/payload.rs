use super::{
    CpuFunctionParameter, DataTransportErrorCode, DataTransportSize, S7MessageType, S7Parameter,
    SzlModuleTypeClass, SzlSublist,
};
use bytes::Bytes;
use plclink_sdk::{
    wire::field::{
        read_array_count, read_const, read_enum, read_implicit, read_optional, read_reserved,
        write_implicit,
    },
    CodecError, ReadBuffer, WireEncode, WriteBuffer,
};

/// One data item of a ReadVar response or WriteVar request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7VarPayloadDataItem {
    pub return_code: DataTransportErrorCode,
    pub transport_size: DataTransportSize,
    pub data: Bytes,
}

impl S7VarPayloadDataItem {
    pub fn new(
        return_code: DataTransportErrorCode,
        transport_size: DataTransportSize,
        data: Bytes,
    ) -> Self {
        Self {
            return_code,
            transport_size,
            data,
        }
    }

    fn length_field(&self) -> usize {
        if self.transport_size == DataTransportSize::Bit {
            self.data.len()
        } else if self.transport_size.size_in_bits() {
            self.data.len() * 8
        } else {
            self.data.len()
        }
    }

    #[inline]
    fn needs_pad(&self, last: bool) -> bool {
        !last && self.data.len() % 2 == 1
    }

    fn encoded_len(&self, last: bool) -> usize {
        4 + self.data.len() + usize::from(self.needs_pad(last))
    }

    fn encode_to(&self, dst: &mut WriteBuffer, last: bool) -> Result<(), CodecError> {
        dst.write_u8(8, self.return_code.code())?;
        dst.write_u8(8, self.transport_size.code())?;
        write_implicit(dst, "dataLength", 16, self.length_field())?;
        dst.write_bytes(&self.data)?;
        if self.needs_pad(last) {
            dst.write_u8(8, 0x00)?;
        }
        Ok(())
    }

    fn decode(src: &mut ReadBuffer, last: bool) -> Result<Self, CodecError> {
        let return_code = read_enum(src, "DataTransportErrorCode", 8)?;
        let transport_size: DataTransportSize = read_enum(src, "DataTransportSize", 8)?;
        let length = read_implicit(src, 16)? as usize;
        let count = if transport_size.size_in_bits() {
            length.div_ceil(8)
        } else {
            length
        };
        let data = src.read_bytes(count)?;
        if count % 2 == 1 {
            if last {
                // Some controllers pad the final item as well.
                read_optional(src, |b| read_const(b, "pad", 8, 0x00))?;
            } else {
                read_reserved(src, "pad", 8, 0x00)?;
            }
        }
        Ok(Self {
            return_code,
            transport_size,
            data,
        })
    }
}

/// System status list id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SzlId {
    pub type_class: SzlModuleTypeClass,
    /// 4 bits
    pub sublist_extract: u8,
    pub sublist_list: SzlSublist,
}

impl SzlId {
    fn encode_to(&self, dst: &mut WriteBuffer) -> Result<(), CodecError> {
        dst.write_u8(4, self.type_class.code())?;
        dst.write_u8(4, self.sublist_extract)?;
        dst.write_u8(8, self.sublist_list.code())
    }

    fn decode(src: &mut ReadBuffer) -> Result<Self, CodecError> {
        Ok(Self {
            type_class: read_enum(src, "SzlModuleTypeClass", 4)?,
            sublist_extract: src.read_u8(4)?,
            sublist_list: read_enum(src, "SzlSublist", 8)?,
        })
    }
}

/// Module identification record of an SZL response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SzlDataTreeItem {
    pub item_index: u16,
    /// Article number, 20 bytes, blank padded
    pub mlfb: Bytes,
    pub module_type_id: u16,
    pub ausbg: u16,
    pub ausbe: u16,
}

const SZL_ITEM_LENGTH: usize = 28;
const MLFB_LENGTH: usize = 20;

impl SzlDataTreeItem {
    pub fn article_number(&self) -> String {
        String::from_utf8_lossy(&self.mlfb)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }

    fn encode_to(&self, dst: &mut WriteBuffer) -> Result<(), CodecError> {
        if self.mlfb.len() != MLFB_LENGTH {
            return Err(CodecError::ValueOutOfRange { field: "mlfb" });
        }
        dst.write_u16(16, self.item_index)?;
        dst.write_bytes(&self.mlfb)?;
        dst.write_u16(16, self.module_type_id)?;
        dst.write_u16(16, self.ausbg)?;
        dst.write_u16(16, self.ausbe)
    }

    fn decode(src: &mut ReadBuffer) -> Result<Self, CodecError> {
        Ok(Self {
            item_index: src.read_u16(16)?,
            mlfb: src.read_bytes(MLFB_LENGTH)?,
            module_type_id: src.read_u16(16)?,
            ausbg: src.read_u16(16)?,
            ausbe: src.read_u16(16)?,
        })
    }
}

/// Body of a UserData payload item, selected by the CPU function
/// group, type and subfunction of the matching parameter item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDataPayloadBody {
    /// Item without data, e.g. an SZL read the controller refused
    Empty,
    ReadSzlRequest {
        szl_id: SzlId,
        szl_index: u16,
    },
    ReadSzlResponse {
        szl_id: SzlId,
        szl_index: u16,
        items: Vec<SzlDataTreeItem>,
    },
}

impl UserDataPayloadBody {
    fn encoded_len(&self) -> usize {
        match self {
            UserDataPayloadBody::Empty => 0,
            UserDataPayloadBody::ReadSzlRequest { .. } => 4,
            UserDataPayloadBody::ReadSzlResponse { items, .. } => 8 + items.len() * SZL_ITEM_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDataPayloadItem {
    pub return_code: DataTransportErrorCode,
    pub transport_size: DataTransportSize,
    pub body: UserDataPayloadBody,
}

impl UserDataPayloadItem {
    fn encode_to(&self, dst: &mut WriteBuffer) -> Result<(), CodecError> {
        dst.write_u8(8, self.return_code.code())?;
        dst.write_u8(8, self.transport_size.code())?;
        write_implicit(dst, "dataLength", 16, self.body.encoded_len())?;
        match &self.body {
            UserDataPayloadBody::Empty => Ok(()),
            UserDataPayloadBody::ReadSzlRequest { szl_id, szl_index } => {
                szl_id.encode_to(dst)?;
                dst.write_u16(16, *szl_index)
            }
            UserDataPayloadBody::ReadSzlResponse {
                szl_id,
                szl_index,
                items,
            } => {
                szl_id.encode_to(dst)?;
                dst.write_u16(16, *szl_index)?;
                dst.write_u16(16, SZL_ITEM_LENGTH as u16)?;
                write_implicit(dst, "szlItemCount", 16, items.len())?;
                items.iter().try_for_each(|i| i.encode_to(dst))
            }
        }
    }

    fn decode(src: &mut ReadBuffer, function: &CpuFunctionParameter) -> Result<Self, CodecError> {
        let return_code = read_enum(src, "DataTransportErrorCode", 8)?;
        let transport_size = read_enum(src, "DataTransportSize", 8)?;
        let length = read_implicit(src, 16)? as usize;
        let mut section = ReadBuffer::new(src.read_bytes(length)?);
        let body = if length == 0 {
            UserDataPayloadBody::Empty
        } else {
            match (
                function.function_group,
                function.function_type,
                function.subfunction,
            ) {
                (0x4, 0x4, 0x01) => UserDataPayloadBody::ReadSzlRequest {
                    szl_id: SzlId::decode(&mut section)?,
                    szl_index: section.read_u16(16)?,
                },
                (0x4, 0x8, 0x01) => {
                    let szl_id = SzlId::decode(&mut section)?;
                    let szl_index = section.read_u16(16)?;
                    read_const(&mut section, "szlItemLength", 16, SZL_ITEM_LENGTH as u64)?;
                    let count = read_implicit(&mut section, 16)? as usize;
                    let items =
                        read_array_count(&mut section, count, |b, _| SzlDataTreeItem::decode(b))?;
                    UserDataPayloadBody::ReadSzlResponse {
                        szl_id,
                        szl_index,
                        items,
                    }
                }
                (group, kind, sub) => {
                    return Err(CodecError::unknown_discriminator(
                        "S7PayloadUserDataItem",
                        (u64::from(group) << 16) | (u64::from(kind) << 8) | u64::from(sub),
                    ))
                }
            }
        };
        Ok(Self {
            return_code,
            transport_size,
            body,
        })
    }
}

/// Payload section, selected by message type and parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7Payload {
    ReadVarResponse { items: Vec<S7VarPayloadDataItem> },
    WriteVarRequest { items: Vec<S7VarPayloadDataItem> },
    WriteVarResponse { items: Vec<DataTransportErrorCode> },
    UserData { items: Vec<UserDataPayloadItem> },
}

impl S7Payload {
    /// Decode a payload whose layout depends on the enclosing message
    /// type and the already decoded parameter.
    pub fn decode_for(
        src: &mut ReadBuffer,
        message_type: S7MessageType,
        parameter: Option<&S7Parameter>,
    ) -> Result<Self, CodecError> {
        let is_response = matches!(
            message_type,
            S7MessageType::Response | S7MessageType::ResponseData
        );
        match parameter {
            Some(S7Parameter::ReadVarResponse { num_items }) if is_response => {
                let count = usize::from(*num_items);
                Ok(S7Payload::ReadVarResponse {
                    items: read_array_count(src, count, |b, i| {
                        S7VarPayloadDataItem::decode(b, i + 1 == count)
                    })?,
                })
            }
            Some(S7Parameter::WriteVarRequest { items })
                if message_type == S7MessageType::Request =>
            {
                let count = items.len();
                Ok(S7Payload::WriteVarRequest {
                    items: read_array_count(src, count, |b, i| {
                        S7VarPayloadDataItem::decode(b, i + 1 == count)
                    })?,
                })
            }
            Some(S7Parameter::WriteVarResponse { num_items }) if is_response => {
                Ok(S7Payload::WriteVarResponse {
                    items: read_array_count(src, usize::from(*num_items), |b, _| {
                        read_enum(b, "DataTransportErrorCode", 8)
                    })?,
                })
            }
            Some(S7Parameter::UserData { items }) if message_type == S7MessageType::UserData => {
                Ok(S7Payload::UserData {
                    items: read_array_count(src, items.len(), |b, i| {
                        UserDataPayloadItem::decode(b, &items[i])
                    })?,
                })
            }
            _ => Err(CodecError::unknown_discriminator(
                "S7Payload",
                message_type.code(),
            )),
        }
    }

    /// Number of items, whatever the payload kind.
    pub fn item_count(&self) -> usize {
        match self {
            S7Payload::ReadVarResponse { items } | S7Payload::WriteVarRequest { items } => {
                items.len()
            }
            S7Payload::WriteVarResponse { items } => items.len(),
            S7Payload::UserData { items } => items.len(),
        }
    }
}

impl WireEncode for S7Payload {
    type Context = ();

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        match self {
            S7Payload::ReadVarResponse { items } | S7Payload::WriteVarRequest { items } => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.encoded_len(i + 1 == items.len()))
                .sum(),
            S7Payload::WriteVarResponse { items } => items.len(),
            S7Payload::UserData { items } => items.iter().map(|i| 4 + i.body.encoded_len()).sum(),
        }
    }

    fn encode_to(&self, dst: &mut WriteBuffer, _ctx: &Self::Context) -> Result<(), CodecError> {
        match self {
            S7Payload::ReadVarResponse { items } | S7Payload::WriteVarRequest { items } => {
                let last = items.len().saturating_sub(1);
                items
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, item)| item.encode_to(dst, i == last))
            }
            S7Payload::WriteVarResponse { items } => {
                items.iter().try_for_each(|code| dst.write_u8(8, code.code()))
            }
            S7Payload::UserData { items } => items.iter().try_for_each(|i| i.encode_to(dst)),
        }
    }
}
