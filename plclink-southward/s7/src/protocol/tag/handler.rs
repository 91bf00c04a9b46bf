use super::{Tag, MAX_BLOCK_NUMBER, MAX_BYTE_OFFSET, MAX_STRING_LENGTH};
use crate::protocol::{
    error::{Error, Result},
    frame::{MemoryArea, S7Address, S7DataType},
};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1, take_while_m_n},
    character::complete::{anychar, char, one_of},
    combinator::{all_consuming, map, map_res, opt},
    multi::count,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use plclink_sdk::WireDecode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AreaSpec {
    DataBlock(u32),
    ShortName(char),
}

/// Fields captured by one of the textual address forms.
#[derive(Debug)]
struct RawTag<'a> {
    area: AreaSpec,
    size_code: Option<char>,
    byte_offset: u32,
    bit_offset: Option<u8>,
    type_name: &'a str,
    string_length: Option<u32>,
    num_elements: Option<u32>,
}

fn number<'a>(min: usize, max: usize) -> impl FnMut(&'a str) -> IResult<&'a str, u32> {
    map_res(
        take_while_m_n(min, max, |c: char| c.is_ascii_digit()),
        |s: &str| s.parse::<u32>(),
    )
}

fn bit_offset(input: &str) -> IResult<&str, Option<u8>> {
    opt(preceded(
        char('.'),
        map(one_of("01234567"), |c| c as u8 - b'0'),
    ))(input)
}

fn size_code(input: &str) -> IResult<&str, Option<char>> {
    opt(one_of("XBWD"))(input)
}

/// `NAME`, or `STRING(n)` / `WSTRING(n)`.
fn type_spec(input: &str) -> IResult<&str, (&str, Option<u32>)> {
    alt((
        tuple((
            alt((tag("WSTRING"), tag("STRING"))),
            map(delimited(char('('), number(1, 3), char(')')), Some),
        )),
        map(
            take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
            |name| (name, None),
        ),
    ))(input)
}

fn element_count(input: &str) -> IResult<&str, Option<u32>> {
    opt(delimited(char('['), number(1, 5), char(']')))(input)
}

/// `%DB<n>.DB<size?><byte>(.<bit>)?:<type>([<count>])?`
fn db_long(input: &str) -> IResult<&str, RawTag<'_>> {
    map(
        tuple((
            tag("%DB"),
            number(1, 5),
            char('.'),
            tag("DB"),
            size_code,
            number(1, 7),
            bit_offset,
            char(':'),
            type_spec,
            element_count,
        )),
        |(_, block, _, _, size_code, byte_offset, bit_offset, _, (type_name, len), n)| RawTag {
            area: AreaSpec::DataBlock(block),
            size_code,
            byte_offset,
            bit_offset,
            type_name,
            string_length: len,
            num_elements: n,
        },
    )(input)
}

/// `%DB<n>:<byte>(.<bit>)?:<type>([<count>])?`
fn db_short(input: &str) -> IResult<&str, RawTag<'_>> {
    map(
        tuple((
            tag("%DB"),
            number(1, 5),
            char(':'),
            number(1, 7),
            bit_offset,
            char(':'),
            type_spec,
            element_count,
        )),
        |(_, block, _, byte_offset, bit_offset, _, (type_name, len), n)| RawTag {
            area: AreaSpec::DataBlock(block),
            size_code: None,
            byte_offset,
            bit_offset,
            type_name,
            string_length: len,
            num_elements: n,
        },
    )(input)
}

/// `%<area><size?><byte>(.<bit>)?:<type>([<count>])?`
fn generic(input: &str) -> IResult<&str, RawTag<'_>> {
    map(
        tuple((
            char('%'),
            anychar,
            size_code,
            number(1, 7),
            bit_offset,
            char(':'),
            type_spec,
            element_count,
        )),
        |(_, area, size_code, byte_offset, bit_offset, _, (type_name, len), n)| RawTag {
            area: AreaSpec::ShortName(area),
            size_code,
            byte_offset,
            bit_offset,
            type_name,
            string_length: len,
            num_elements: n,
        },
    )(input)
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s: &str| u8::from_str_radix(s, 16),
    )(input)
}

/// Ten dash separated hex bytes holding a raw S7-Any address.
fn proxy(input: &str) -> IResult<&str, Vec<u8>> {
    map(
        tuple((hex_byte, count(preceded(char('-'), hex_byte), 9))),
        |(first, rest)| {
            let mut bytes = Vec::with_capacity(10);
            bytes.push(first);
            bytes.extend(rest);
            bytes
        },
    )(input)
}

/// Parses textual tag addresses into validated [`Tag`]s.
///
/// Accepted forms, tried in order:
///
/// * `%DB1.DBX5.3:BOOL`, `%DB1.DBW4:INT[10]`, `%DB1.DBB0:STRING(20)`
/// * `%DB1:4:INT`, `%DB1:0:WSTRING(10)`
/// * `10-01-00-01-00-01-84-00-00-2B` (raw S7-Any address)
/// * `%MW10:INT`, `%I0.1:BOOL`, `%QB2:BYTE[4]`
#[derive(Debug, Clone)]
pub struct TagHandler {
    default_string_length: u16,
}

impl Default for TagHandler {
    fn default() -> Self {
        Self {
            default_string_length: MAX_STRING_LENGTH,
        }
    }
}

impl TagHandler {
    pub fn new(default_string_length: u16) -> Self {
        Self {
            default_string_length,
        }
    }

    pub fn parse_tag(&self, address: &str) -> Result<Tag> {
        let address = address.trim();
        if let Ok((_, raw)) = all_consuming(db_long)(address) {
            return self.resolve(address, raw);
        }
        if let Ok((_, raw)) = all_consuming(db_short)(address) {
            return self.resolve(address, raw);
        }
        if let Ok((_, bytes)) = all_consuming(proxy)(address) {
            return Self::resolve_proxy(address, bytes);
        }
        if let Ok((_, raw)) = all_consuming(generic)(address) {
            return self.resolve(address, raw);
        }
        Err(Error::ErrInvalidAddress(format!("unable to parse '{address}'")))
    }

    fn resolve(&self, address: &str, raw: RawTag<'_>) -> Result<Tag> {
        let invalid = |reason: String| Error::ErrInvalidAddress(format!("{address}: {reason}"));

        let data_type = S7DataType::from_name(raw.type_name)
            .ok_or_else(|| invalid(format!("unknown type {}", raw.type_name)))?;
        let (memory_area, block_number) = match raw.area {
            AreaSpec::DataBlock(block) => {
                if !(1..=MAX_BLOCK_NUMBER).contains(&block) {
                    return Err(invalid(format!(
                        "data block numbers outside 1..={MAX_BLOCK_NUMBER} are not supported"
                    )));
                }
                (MemoryArea::DataBlocks, block as u16)
            }
            AreaSpec::ShortName(c) => {
                let area = MemoryArea::from_short_name(c.encode_utf8(&mut [0u8; 4]))
                    .ok_or_else(|| invalid(format!("unknown memory area '{c}'")))?;
                (area, 0)
            }
        };
        if raw.byte_offset > MAX_BYTE_OFFSET {
            return Err(invalid(format!(
                "byte offset must not exceed {MAX_BYTE_OFFSET}"
            )));
        }
        if let Some(code) = raw.size_code {
            if code != data_type.short_name() {
                return Err(invalid(format!(
                    "transfer size code '{code}' doesn't match data type {data_type}"
                )));
            }
        }
        let num_elements = match raw.num_elements {
            Some(n) => u16::try_from(n).map_err(|_| invalid(format!("element count {n} too large")))?,
            None => 1,
        };
        let string_length = if data_type.is_string() {
            Some(match raw.string_length {
                Some(len) => {
                    u16::try_from(len).map_err(|_| invalid(format!("string length {len}")))?
                }
                None => self.default_string_length,
            })
        } else {
            None
        };

        Tag::build(
            memory_area,
            block_number,
            raw.byte_offset,
            raw.bit_offset,
            num_elements,
            data_type,
            string_length,
        )
        .map_err(|e| match e {
            Error::ErrInvalidAddress(reason) => invalid(reason),
            other => other,
        })
    }

    fn resolve_proxy(address: &str, bytes: Vec<u8>) -> Result<Tag> {
        let S7Address::Any(any) = S7Address::from_bytes(bytes.into(), &())
            .map_err(|e| Error::ErrInvalidAddress(format!("{address}: {e}")))?;
        let data_type = S7DataType::from_transport_size(any.transport_size).ok_or_else(|| {
            Error::ErrInvalidAddress(format!(
                "{address}: transport size {:?} has no value type",
                any.transport_size
            ))
        })?;
        Tag::build(
            any.area,
            any.db_number,
            any.byte_address,
            Some(any.bit_address),
            any.number_of_elements,
            data_type,
            None,
        )
    }
}
