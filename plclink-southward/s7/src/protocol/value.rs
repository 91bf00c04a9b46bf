//! Typed PLC values and their S7 wire representation.

use super::{
    error::{Error, Result},
    frame::S7DataType,
    tag::{Tag, MAX_STRING_LENGTH},
};
use bytes::Bytes;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use plclink_sdk::{CodecError, ReadBuffer, WriteBuffer};
use serde_json::{Number, Value as JsonValue};

/// A value read from or written to a controller.
///
/// Scalar tags map to a single variant, array tags to [`PlcValue::List`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlcValue {
    Bool(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    LWord(u64),
    SInt(i8),
    USInt(u8),
    Int(i16),
    UInt(u16),
    DInt(i32),
    UDInt(u32),
    LInt(i64),
    ULInt(u64),
    Real(f32),
    LReal(f64),
    /// Latin-1 character
    Char(char),
    /// UTF-16 code unit
    WChar(char),
    String(String),
    WString(String),
    /// IEC TIME, millisecond resolution
    Time(Duration),
    /// IEC LTIME, nanosecond resolution
    LTime(Duration),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    DateAndTime(NaiveDateTime),
    List(Vec<PlcValue>),
    Null,
}

/// S7 DATE counts days from here.
fn s7_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1990, 1, 1)
}

/// Convert one BCD-encoded byte to decimal 0..=99
pub(crate) fn bcd_to_dec(b: u8) -> u8 {
    ((b >> 4) & 0x0F) * 10 + (b & 0x0F)
}

/// Convert 0..=99 to one BCD byte
pub(crate) fn dec_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Decode 8-byte S7 DATE_AND_TIME (BCD).
///
/// Byte 6 holds the hundreds and tens of milliseconds, the high nibble of
/// byte 7 the units; the low nibble is the weekday and is ignored.
pub(crate) fn decode_date_and_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.len() < 8 {
        return None;
    }
    let yy = i32::from(bcd_to_dec(bytes[0]));
    let year = if yy < 90 { 2000 + yy } else { 1900 + yy };
    let millis = u32::from(bcd_to_dec(bytes[6])) * 10 + u32::from(bytes[7] >> 4);
    NaiveDate::from_ymd_opt(
        year,
        u32::from(bcd_to_dec(bytes[1])),
        u32::from(bcd_to_dec(bytes[2])),
    )?
    .and_hms_milli_opt(
        u32::from(bcd_to_dec(bytes[3])),
        u32::from(bcd_to_dec(bytes[4])),
        u32::from(bcd_to_dec(bytes[5])),
        millis,
    )
}

/// Encode into 8-byte S7 DATE_AND_TIME. Years outside 1990..=2089 are not
/// representable.
pub(crate) fn encode_date_and_time(dt: &NaiveDateTime) -> Option<[u8; 8]> {
    let year = dt.year();
    if !(1990..=2089).contains(&year) {
        return None;
    }
    let millis = (dt.nanosecond() / 1_000_000).min(999);
    Some([
        dec_to_bcd((year % 100) as u8),
        dec_to_bcd(dt.month() as u8),
        dec_to_bcd(dt.day() as u8),
        dec_to_bcd(dt.hour() as u8),
        dec_to_bcd(dt.minute() as u8),
        dec_to_bcd(dt.second() as u8),
        dec_to_bcd((millis / 10) as u8),
        (((millis % 10) as u8) << 4) | dt.weekday().number_from_sunday() as u8,
    ])
}

impl PlcValue {
    /// Decode the raw bytes returned for `tag`.
    pub fn decode(tag: &Tag, data: &[u8]) -> Result<PlcValue> {
        let mut src = ReadBuffer::from_slice(data);
        if tag.num_elements() == 1 {
            return Self::decode_element(tag, &mut src);
        }
        (0..tag.num_elements())
            .map(|_| Self::decode_element(tag, &mut src))
            .collect::<Result<Vec<_>>>()
            .map(PlcValue::List)
    }

    fn decode_element(tag: &Tag, src: &mut ReadBuffer) -> Result<PlcValue> {
        use S7DataType as T;
        let value = match tag.data_type() {
            T::Bool => PlcValue::Bool(src.read_u8(8)? & 0x01 != 0),
            T::Byte => PlcValue::Byte(src.read_u8(8)?),
            T::Word => PlcValue::Word(src.read_u16(16)?),
            T::DWord => PlcValue::DWord(src.read_u32(32)?),
            T::LWord => PlcValue::LWord(src.read_u64(64)?),
            T::SInt => PlcValue::SInt(src.read_i8()?),
            T::USInt => PlcValue::USInt(src.read_u8(8)?),
            T::Int => PlcValue::Int(src.read_i16()?),
            T::UInt => PlcValue::UInt(src.read_u16(16)?),
            T::DInt => PlcValue::DInt(src.read_i32()?),
            T::UDInt => PlcValue::UDInt(src.read_u32(32)?),
            T::LInt => PlcValue::LInt(src.read_i64()?),
            T::ULInt => PlcValue::ULInt(src.read_u64(64)?),
            T::Real => PlcValue::Real(src.read_f32()?),
            T::LReal => PlcValue::LReal(src.read_f64()?),
            T::Char => PlcValue::Char(char::from(src.read_u8(8)?)),
            T::WChar => {
                let unit = src.read_u16(16)?;
                PlcValue::WChar(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER))
            }
            T::String => {
                let declared = usize::from(tag.string_length().unwrap_or(MAX_STRING_LENGTH));
                let _max = src.read_u8(8)?;
                let actual = usize::from(src.read_u8(8)?).min(declared);
                let raw = src.read_bytes(declared)?;
                PlcValue::String(raw[..actual].iter().map(|b| char::from(*b)).collect())
            }
            T::WString => {
                let declared = usize::from(tag.string_length().unwrap_or(MAX_STRING_LENGTH));
                let _max = src.read_u16(16)?;
                let actual = usize::from(src.read_u16(16)?).min(declared);
                let raw = src.read_bytes(declared * 2)?;
                let units: Vec<u16> = raw[..actual * 2]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                PlcValue::WString(String::from_utf16_lossy(&units))
            }
            T::Time => PlcValue::Time(Duration::milliseconds(i64::from(src.read_i32()?))),
            T::LTime => PlcValue::LTime(Duration::nanoseconds(src.read_i64()?)),
            T::Date => {
                let days = src.read_u16(16)?;
                s7_epoch()
                    .and_then(|base| base.checked_add_signed(Duration::days(i64::from(days))))
                    .map(PlcValue::Date)
                    .ok_or_else(|| CodecError::decode(format!("invalid DATE {days}")))?
            }
            T::TimeOfDay => {
                let millis = src.read_u32(32)?;
                NaiveTime::from_num_seconds_from_midnight_opt(
                    millis / 1000,
                    (millis % 1000) * 1_000_000,
                )
                .map(PlcValue::TimeOfDay)
                .ok_or_else(|| CodecError::decode(format!("invalid TIME_OF_DAY {millis}")))?
            }
            T::DateAndTime => {
                let raw = src.read_bytes(8)?;
                decode_date_and_time(&raw)
                    .map(PlcValue::DateAndTime)
                    .ok_or_else(|| CodecError::decode(format!("invalid DATE_AND_TIME {raw:02X?}")))?
            }
        };
        Ok(value)
    }

    /// Serialize this value for a write to `tag`.
    ///
    /// Array tags take a [`PlcValue::List`] with exactly `num_elements`
    /// entries. Numeric values are converted to the tag's type when they fit.
    pub fn encode(&self, tag: &Tag) -> Result<Bytes> {
        let mut dst = WriteBuffer::with_capacity(tag.byte_size());
        match (self, tag.num_elements()) {
            (PlcValue::List(items), n) if items.len() == usize::from(n) => {
                for item in items {
                    item.encode_element(tag, &mut dst)?;
                }
            }
            (PlcValue::List(items), n) => {
                return Err(Error::ErrInvalidValue {
                    tag: tag.to_string(),
                    reason: format!("expected {n} elements, got {}", items.len()),
                })
            }
            (value, 1) => value.encode_element(tag, &mut dst)?,
            (_, n) => {
                return Err(Error::ErrInvalidValue {
                    tag: tag.to_string(),
                    reason: format!("expected a list of {n} elements"),
                })
            }
        }
        Ok(dst.into_bytes())
    }

    fn encode_element(&self, tag: &Tag, dst: &mut WriteBuffer) -> Result<()> {
        use S7DataType as T;
        let invalid = |reason: String| Error::ErrInvalidValue {
            tag: tag.to_string(),
            reason,
        };
        let mismatch = || invalid(format!("cannot convert {self:?} to {}", tag.data_type()));
        let integer = |bits: u8, signed: bool| -> Result<u64> {
            let v = self.as_i128().ok_or_else(mismatch)?;
            let (min, max) = if signed {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            } else {
                (0, (1i128 << bits) - 1)
            };
            if v < min || v > max {
                return Err(invalid(format!("{v} out of range for {}", tag.data_type())));
            }
            // two's complement truncated to the field width
            Ok((v as u64) & (u64::MAX >> (64 - bits)))
        };

        match tag.data_type() {
            T::Bool => dst.write_u8(8, u8::from(self.as_bool().ok_or_else(mismatch)?))?,
            T::Byte | T::USInt => dst.write_unsigned(8, integer(8, false)?)?,
            T::SInt => dst.write_unsigned(8, integer(8, true)?)?,
            T::Word | T::UInt => dst.write_unsigned(16, integer(16, false)?)?,
            T::Int => dst.write_unsigned(16, integer(16, true)?)?,
            T::DWord | T::UDInt => dst.write_unsigned(32, integer(32, false)?)?,
            T::DInt => dst.write_unsigned(32, integer(32, true)?)?,
            T::LWord | T::ULInt => dst.write_unsigned(64, integer(64, false)?)?,
            T::LInt => dst.write_unsigned(64, integer(64, true)?)?,
            T::Real => dst.write_f32(self.as_f64().ok_or_else(mismatch)? as f32)?,
            T::LReal => dst.write_f64(self.as_f64().ok_or_else(mismatch)?)?,
            T::Char => {
                let c = self.as_char().ok_or_else(mismatch)?;
                let code = u8::try_from(u32::from(c))
                    .map_err(|_| invalid(format!("'{c}' is not a Latin-1 character")))?;
                dst.write_u8(8, code)?;
            }
            T::WChar => {
                let c = self.as_char().ok_or_else(mismatch)?;
                let mut units = [0u16; 2];
                let encoded = c.encode_utf16(&mut units);
                if encoded.len() != 1 {
                    return Err(invalid(format!("'{c}' needs more than one UTF-16 unit")));
                }
                dst.write_u16(16, encoded[0])?;
            }
            T::String => {
                let s = self.as_str().ok_or_else(mismatch)?;
                let declared = tag.string_length().unwrap_or(MAX_STRING_LENGTH);
                let chars = s.chars().count();
                if chars > usize::from(declared) {
                    return Err(invalid(format!("{chars} characters exceed STRING({declared})")));
                }
                if let Some(c) = s.chars().find(|c| u32::from(*c) > 0xFF) {
                    return Err(invalid(format!("'{c}' is not a Latin-1 character")));
                }
                dst.write_u8(8, declared as u8)?;
                dst.write_u8(8, chars as u8)?;
                dst.write_string(s, usize::from(declared), plclink_sdk::StringEncoding::Latin1)?;
            }
            T::WString => {
                let s = self.as_str().ok_or_else(mismatch)?;
                let declared = tag.string_length().unwrap_or(MAX_STRING_LENGTH);
                let units = s.encode_utf16().count();
                if units > usize::from(declared) {
                    return Err(invalid(format!("{units} characters exceed WSTRING({declared})")));
                }
                dst.write_u16(16, declared)?;
                dst.write_u16(16, units as u16)?;
                dst.write_string(
                    s,
                    usize::from(declared) * 2,
                    plclink_sdk::StringEncoding::Utf16Be,
                )?;
            }
            T::Time => {
                let millis = match self {
                    PlcValue::Time(d) | PlcValue::LTime(d) => i128::from(d.num_milliseconds()),
                    other => other.as_i128().ok_or_else(mismatch)?,
                };
                let millis = i32::try_from(millis)
                    .map_err(|_| invalid(format!("{millis}ms out of range for TIME")))?;
                dst.write_signed(32, i64::from(millis))?;
            }
            T::LTime => {
                let nanos = match self {
                    PlcValue::Time(d) | PlcValue::LTime(d) => {
                        d.num_nanoseconds().map(i128::from).ok_or_else(mismatch)?
                    }
                    other => other.as_i128().ok_or_else(mismatch)?,
                };
                let nanos = i64::try_from(nanos)
                    .map_err(|_| invalid(format!("{nanos}ns out of range for LTIME")))?;
                dst.write_signed(64, nanos)?;
            }
            T::Date => {
                let date = match self {
                    PlcValue::Date(d) => *d,
                    PlcValue::DateAndTime(dt) => dt.date(),
                    PlcValue::String(s) | PlcValue::WString(s) => s
                        .trim()
                        .parse::<NaiveDate>()
                        .map_err(|e| invalid(format!("'{s}': {e}")))?,
                    _ => return Err(mismatch()),
                };
                let days = s7_epoch()
                    .map(|base| date.signed_duration_since(base).num_days())
                    .and_then(|days| u16::try_from(days).ok())
                    .ok_or_else(|| invalid(format!("{date} out of range for DATE")))?;
                dst.write_u16(16, days)?;
            }
            T::TimeOfDay => {
                let time = match self {
                    PlcValue::TimeOfDay(t) => *t,
                    PlcValue::DateAndTime(dt) => dt.time(),
                    PlcValue::String(s) | PlcValue::WString(s) => s
                        .trim()
                        .parse::<NaiveTime>()
                        .map_err(|e| invalid(format!("'{s}': {e}")))?,
                    _ => return Err(mismatch()),
                };
                let millis =
                    time.num_seconds_from_midnight() * 1000 + (time.nanosecond() / 1_000_000).min(999);
                dst.write_u32(32, millis)?;
            }
            T::DateAndTime => {
                let dt = match self {
                    PlcValue::DateAndTime(dt) => *dt,
                    PlcValue::String(s) | PlcValue::WString(s) => s
                        .trim()
                        .parse::<NaiveDateTime>()
                        .map_err(|e| invalid(format!("'{s}': {e}")))?,
                    _ => return Err(mismatch()),
                };
                let raw = encode_date_and_time(&dt)
                    .ok_or_else(|| invalid(format!("{dt} out of range for DATE_AND_TIME")))?;
                dst.write_bytes(&raw)?;
            }
        }
        Ok(())
    }

    fn as_i128(&self) -> Option<i128> {
        Some(match self {
            PlcValue::Bool(b) => i128::from(*b),
            PlcValue::Byte(v) | PlcValue::USInt(v) => i128::from(*v),
            PlcValue::Word(v) | PlcValue::UInt(v) => i128::from(*v),
            PlcValue::DWord(v) | PlcValue::UDInt(v) => i128::from(*v),
            PlcValue::LWord(v) | PlcValue::ULInt(v) => i128::from(*v),
            PlcValue::SInt(v) => i128::from(*v),
            PlcValue::Int(v) => i128::from(*v),
            PlcValue::DInt(v) => i128::from(*v),
            PlcValue::LInt(v) => i128::from(*v),
            PlcValue::Real(v) => return integral(f64::from(*v)),
            PlcValue::LReal(v) => return integral(*v),
            PlcValue::Char(c) | PlcValue::WChar(c) => i128::from(u32::from(*c)),
            PlcValue::String(s) | PlcValue::WString(s) => return s.trim().parse().ok(),
            _ => return None,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PlcValue::Real(v) => Some(f64::from(*v)),
            PlcValue::LReal(v) => Some(*v),
            PlcValue::String(s) | PlcValue::WString(s) => s.trim().parse().ok(),
            other => other.as_i128().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlcValue::Bool(b) => Some(*b),
            PlcValue::String(s) | PlcValue::WString(s) => match s.trim() {
                "true" | "TRUE" | "1" => Some(true),
                "false" | "FALSE" | "0" => Some(false),
                _ => None,
            },
            PlcValue::Real(_) | PlcValue::LReal(_) => self.as_f64().map(|v| v != 0.0),
            other => other.as_i128().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlcValue::String(s) | PlcValue::WString(s) => Some(s),
            _ => None,
        }
    }

    fn as_char(&self) -> Option<char> {
        match self {
            PlcValue::Char(c) | PlcValue::WChar(c) => Some(*c),
            PlcValue::String(s) | PlcValue::WString(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            other => other
                .as_i128()
                .and_then(|v| u32::try_from(v).ok())
                .and_then(char::from_u32),
        }
    }

    /// JSON rendering. TIME is reported in milliseconds, LTIME in
    /// nanoseconds, calendar values as ISO-8601 strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            PlcValue::Bool(b) => JsonValue::Bool(*b),
            PlcValue::Byte(v) | PlcValue::USInt(v) => JsonValue::from(*v),
            PlcValue::Word(v) | PlcValue::UInt(v) => JsonValue::from(*v),
            PlcValue::DWord(v) | PlcValue::UDInt(v) => JsonValue::from(*v),
            PlcValue::LWord(v) | PlcValue::ULInt(v) => JsonValue::from(*v),
            PlcValue::SInt(v) => JsonValue::from(*v),
            PlcValue::Int(v) => JsonValue::from(*v),
            PlcValue::DInt(v) => JsonValue::from(*v),
            PlcValue::LInt(v) => JsonValue::from(*v),
            PlcValue::Real(v) => Number::from_f64(f64::from(*v)).map_or(JsonValue::Null, JsonValue::Number),
            PlcValue::LReal(v) => Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
            PlcValue::Char(c) | PlcValue::WChar(c) => JsonValue::String(c.to_string()),
            PlcValue::String(s) | PlcValue::WString(s) => JsonValue::String(s.clone()),
            PlcValue::Time(d) => JsonValue::from(d.num_milliseconds()),
            PlcValue::LTime(d) => d.num_nanoseconds().map_or(JsonValue::Null, JsonValue::from),
            PlcValue::Date(d) => JsonValue::String(d.to_string()),
            PlcValue::TimeOfDay(t) => JsonValue::String(t.format("%H:%M:%S%.3f").to_string()),
            PlcValue::DateAndTime(dt) => {
                JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
            }
            PlcValue::List(items) => JsonValue::Array(items.iter().map(PlcValue::to_json).collect()),
            PlcValue::Null => JsonValue::Null,
        }
    }

    /// Loosely typed conversion from JSON. The result is converted to the
    /// target tag's type by [`PlcValue::encode`].
    pub fn from_json(value: &JsonValue) -> PlcValue {
        match value {
            JsonValue::Null | JsonValue::Object(_) => PlcValue::Null,
            JsonValue::Bool(b) => PlcValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(v) = n.as_i64() {
                    PlcValue::LInt(v)
                } else if let Some(v) = n.as_u64() {
                    PlcValue::ULInt(v)
                } else {
                    PlcValue::LReal(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => PlcValue::String(s.clone()),
            JsonValue::Array(items) => PlcValue::List(items.iter().map(PlcValue::from_json).collect()),
        }
    }
}

fn integral(v: f64) -> Option<i128> {
    (v.is_finite() && v.fract() == 0.0).then_some(v as i128)
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for PlcValue {
                fn from(v: $t) -> Self {
                    PlcValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    u8 => Byte,
    i8 => SInt,
    i16 => Int,
    u16 => UInt,
    i32 => DInt,
    u32 => UDInt,
    i64 => LInt,
    u64 => ULInt,
    f32 => Real,
    f64 => LReal,
    String => String,
    &str => String,
    NaiveDate => Date,
    NaiveTime => TimeOfDay,
    NaiveDateTime => DateAndTime,
}

impl From<Vec<PlcValue>> for PlcValue {
    fn from(items: Vec<PlcValue>) -> Self {
        PlcValue::List(items)
    }
}

impl From<JsonValue> for PlcValue {
    fn from(value: JsonValue) -> Self {
        PlcValue::from_json(&value)
    }
}
