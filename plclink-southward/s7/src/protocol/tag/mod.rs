//! Tag model and address grammar.

mod handler;

pub use handler::TagHandler;

use super::{
    error::{Error, Result},
    frame::{MemoryArea, S7Address, S7DataType, S7TransportSize},
};
use std::fmt;

pub(crate) const MAX_BLOCK_NUMBER: u32 = 64_000;
pub(crate) const MAX_BYTE_OFFSET: u32 = 2_097_151;
pub(crate) const MAX_STRING_LENGTH: u16 = 254;

/// A validated reference to a run of elements in controller memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    memory_area: MemoryArea,
    block_number: u16,
    byte_offset: u32,
    bit_offset: u8,
    num_elements: u16,
    data_type: S7DataType,
    string_length: Option<u16>,
}

impl Tag {
    /// Build a non-string tag, enforcing the same rules as the grammar.
    pub fn new(
        memory_area: MemoryArea,
        block_number: u16,
        byte_offset: u32,
        bit_offset: Option<u8>,
        num_elements: u16,
        data_type: S7DataType,
    ) -> Result<Self> {
        if data_type.is_string() {
            return Err(Error::ErrInvalidAddress(format!(
                "{data_type} tags need a string length"
            )));
        }
        Self::build(
            memory_area,
            block_number,
            byte_offset,
            bit_offset,
            num_elements,
            data_type,
            None,
        )
    }

    /// Build a STRING or WSTRING tag with a declared maximum length.
    pub fn string(
        memory_area: MemoryArea,
        block_number: u16,
        byte_offset: u32,
        num_elements: u16,
        data_type: S7DataType,
        string_length: u16,
    ) -> Result<Self> {
        if !data_type.is_string() {
            return Err(Error::ErrInvalidAddress(format!(
                "{data_type} does not take a string length"
            )));
        }
        Self::build(
            memory_area,
            block_number,
            byte_offset,
            None,
            num_elements,
            data_type,
            Some(string_length),
        )
    }

    pub(crate) fn build(
        memory_area: MemoryArea,
        block_number: u16,
        byte_offset: u32,
        bit_offset: Option<u8>,
        num_elements: u16,
        data_type: S7DataType,
        string_length: Option<u16>,
    ) -> Result<Self> {
        if matches!(
            memory_area,
            MemoryArea::DataBlocks | MemoryArea::InstanceDataBlocks
        ) && !(1..=MAX_BLOCK_NUMBER).contains(&u32::from(block_number))
        {
            return Err(Error::ErrInvalidAddress(format!(
                "data block number {block_number} outside 1..={MAX_BLOCK_NUMBER}"
            )));
        }
        if byte_offset > MAX_BYTE_OFFSET {
            return Err(Error::ErrInvalidAddress(format!(
                "byte offset {byte_offset} exceeds {MAX_BYTE_OFFSET}"
            )));
        }
        let bit_offset = match (data_type, bit_offset) {
            (S7DataType::Bool, None) => {
                return Err(Error::ErrInvalidAddress(
                    "expected bit offset for BOOL".to_string(),
                ))
            }
            (S7DataType::Bool, Some(bit)) if bit > 7 => {
                return Err(Error::ErrInvalidAddress(format!("bit offset {bit} exceeds 7")))
            }
            (S7DataType::Bool, Some(bit)) => bit,
            (_, Some(bit)) if bit != 0 => {
                return Err(Error::ErrInvalidAddress(
                    "a bit offset other than 0 is only supported for BOOL".to_string(),
                ))
            }
            (_, _) => 0,
        };
        if num_elements == 0 {
            return Err(Error::ErrInvalidAddress(
                "element count must be at least 1".to_string(),
            ));
        }
        if data_type == S7DataType::String
            && string_length.is_some_and(|len| len > MAX_STRING_LENGTH)
        {
            return Err(Error::ErrInvalidAddress(format!(
                "STRING length exceeds {MAX_STRING_LENGTH}"
            )));
        }
        Ok(Self {
            memory_area,
            block_number,
            byte_offset,
            bit_offset,
            num_elements,
            data_type,
            string_length: if data_type.is_string() {
                string_length
            } else {
                None
            },
        })
    }

    #[inline]
    pub fn memory_area(&self) -> MemoryArea {
        self.memory_area
    }

    #[inline]
    pub fn block_number(&self) -> u16 {
        self.block_number
    }

    #[inline]
    pub fn byte_offset(&self) -> u32 {
        self.byte_offset
    }

    #[inline]
    pub fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    #[inline]
    pub fn num_elements(&self) -> u16 {
        self.num_elements
    }

    #[inline]
    pub fn data_type(&self) -> S7DataType {
        self.data_type
    }

    #[inline]
    pub fn string_length(&self) -> Option<u16> {
        self.string_length
    }

    /// Bytes occupied by one element on the wire.
    pub fn element_size(&self) -> usize {
        let len = usize::from(self.string_length.unwrap_or(MAX_STRING_LENGTH));
        match self.data_type {
            S7DataType::String => len + 2,
            S7DataType::WString => (len + 2) * 2,
            other => other.size_in_bytes(),
        }
    }

    /// Bytes occupied by all elements.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.element_size() * usize::from(self.num_elements)
    }

    /// The S7-Any address used to read or write this tag.
    ///
    /// Types without a native transport size are addressed as byte
    /// arrays; strings as character arrays including their header.
    pub fn to_s7_address(&self) -> Result<S7Address> {
        let (transport_size, count) = match self.data_type {
            S7DataType::String | S7DataType::WString => (S7TransportSize::Char, self.byte_size()),
            dt => match dt.transport_size() {
                Some(ts) => (ts, usize::from(self.num_elements)),
                None => (S7TransportSize::Byte, self.byte_size()),
            },
        };
        let count = u16::try_from(count).map_err(|_| {
            Error::ErrInvalidAddress(format!("{self} spans more than 65535 elements"))
        })?;
        Ok(S7Address::any(
            transport_size,
            count,
            self.block_number,
            self.memory_area,
            self.byte_offset,
            self.bit_offset,
        ))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.data_type.short_name();
        match self.memory_area {
            MemoryArea::DataBlocks => {
                write!(f, "%DB{}.DB{}{}", self.block_number, size, self.byte_offset)?
            }
            area => write!(f, "%{}{}{}", area.short_name(), size, self.byte_offset)?,
        }
        if self.data_type == S7DataType::Bool {
            write!(f, ".{}", self.bit_offset)?;
        }
        write!(f, ":{}", self.data_type)?;
        if let Some(len) = self.string_length {
            write!(f, "({len})")?;
        }
        if self.num_elements > 1 {
            write!(f, "[{}]", self.num_elements)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::S7AnyAddress;

    fn any(tag: &Tag) -> S7AnyAddress {
        match tag.to_s7_address().unwrap() {
            S7Address::Any(a) => a,
        }
    }

    #[test]
    fn bool_requires_bit_and_others_forbid_it() {
        assert!(Tag::new(MemoryArea::FlagsMarkers, 0, 0, None, 1, S7DataType::Bool).is_err());
        assert!(Tag::new(MemoryArea::FlagsMarkers, 0, 0, Some(3), 1, S7DataType::Int).is_err());
        assert!(Tag::new(MemoryArea::FlagsMarkers, 0, 0, Some(0), 1, S7DataType::Int).is_ok());
    }

    #[test]
    fn block_number_is_bounded() {
        assert!(Tag::new(MemoryArea::DataBlocks, 0, 0, None, 1, S7DataType::Int).is_err());
        assert!(Tag::new(MemoryArea::DataBlocks, 64_001, 0, None, 1, S7DataType::Int).is_err());
        assert!(Tag::new(MemoryArea::DataBlocks, 64_000, 0, None, 1, S7DataType::Int).is_ok());
    }

    #[test]
    fn string_addresses_cover_header() {
        let tag = Tag::string(MemoryArea::DataBlocks, 1, 0, 1, S7DataType::String, 10).unwrap();
        let a = any(&tag);
        assert_eq!(a.transport_size, S7TransportSize::Char);
        assert_eq!(a.number_of_elements, 12);

        let tag = Tag::string(MemoryArea::DataBlocks, 1, 0, 2, S7DataType::WString, 10).unwrap();
        assert_eq!(any(&tag).number_of_elements, 48);
    }

    #[test]
    fn time_types_read_as_bytes() {
        let tag = Tag::new(MemoryArea::DataBlocks, 1, 0, None, 3, S7DataType::Time).unwrap();
        let a = any(&tag);
        assert_eq!(a.transport_size, S7TransportSize::Byte);
        assert_eq!(a.number_of_elements, 12);

        let tag = Tag::new(MemoryArea::DataBlocks, 1, 0, None, 1, S7DataType::DateAndTime).unwrap();
        assert_eq!(any(&tag).number_of_elements, 8);

        let tag = Tag::new(MemoryArea::DataBlocks, 1, 0, None, 2, S7DataType::Int).unwrap();
        let a = any(&tag);
        assert_eq!(a.transport_size, S7TransportSize::Int);
        assert_eq!(a.number_of_elements, 2);
    }

    #[test]
    fn display_renders_long_form() {
        let tag = Tag::new(MemoryArea::DataBlocks, 1, 5, Some(3), 1, S7DataType::Bool).unwrap();
        assert_eq!(tag.to_string(), "%DB1.DBX5.3:BOOL");
        let tag = Tag::new(MemoryArea::FlagsMarkers, 0, 10, None, 4, S7DataType::Int).unwrap();
        assert_eq!(tag.to_string(), "%MW10:INT[4]");
        let tag = Tag::string(MemoryArea::DataBlocks, 2, 0, 1, S7DataType::String, 20).unwrap();
        assert_eq!(tag.to_string(), "%DB2.DBB0:STRING(20)");
    }
}
