use super::{
    super::error::{Error as S7Error, Result as S7Result},
    ControllerType, DeviceGroup,
};
use std::{result::Result as StdResult, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tsap(pub u8, pub u8); // (high byte, low byte)

impl Tsap {
    /// Build a TSAP from device group, rack and slot.
    #[inline]
    pub fn from_group(group: DeviceGroup, rack: u8, slot: u8) -> Self {
        Tsap(group as u8, (rack << 5) | slot)
    }

    #[inline]
    pub fn high(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn low(&self) -> u8 {
        self.1
    }
}

impl From<Tsap> for u16 {
    #[inline]
    fn from(tsap: Tsap) -> Self {
        ((tsap.0 as u16) << 8) | (tsap.1 as u16)
    }
}

impl From<u16> for Tsap {
    #[inline]
    fn from(value: u16) -> Self {
        Tsap((value >> 8) as u8, (value & 0xFF) as u8)
    }
}

impl TryFrom<&str> for Tsap {
    type Error = S7Error;

    /// Parse TSAP from string.
    ///
    /// Supported forms:
    /// - "HH:LL" where HH/LL are hex bytes (e.g. "03:00")
    /// - "0xHHLL" 16-bit hex (e.g. "0x0300")
    /// - decimal u16 (e.g. "768")
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let s = value.trim();
        let hex_byte = |v: &str| {
            u8::from_str_radix(v.trim().trim_start_matches("0x").trim_start_matches("0X"), 16)
                .map_err(|_| S7Error::InvalidConfiguration("tsap"))
        };
        if let Some((h, l)) = s.split_once(':') {
            return Ok(Tsap(hex_byte(h)?, hex_byte(l)?));
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let v = u16::from_str_radix(hex, 16).map_err(|_| S7Error::InvalidConfiguration("tsap"))?;
            return Ok(Tsap::from(v));
        }
        s.parse::<u16>()
            .map(Tsap::from)
            .map_err(|_| S7Error::InvalidConfiguration("tsap"))
    }
}

impl FromStr for Tsap {
    type Err = S7Error;

    #[inline]
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Tsap::try_from(s)
    }
}

/// Calling (local) and called (remote) TSAP of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsapPair {
    pub local: Tsap,
    pub remote: Tsap,
}

impl TryFrom<&str> for TsapPair {
    type Error = S7Error;

    /// Parse TSAP pair from "local/remote". Examples:
    /// - "03:00/03:01"
    /// - "0x0300/0x0301"
    /// - "768/769"
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let (l, r) = value
            .split_once('/')
            .ok_or(S7Error::InvalidConfiguration("tsap"))?;
        Ok(TsapPair {
            local: Tsap::try_from(l)?,
            remote: Tsap::try_from(r)?,
        })
    }
}

impl FromStr for TsapPair {
    type Err = S7Error;

    #[inline]
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        TsapPair::try_from(s)
    }
}

#[inline]
pub(crate) fn validate_rack_slot(rack: u8, slot: u8) -> S7Result<()> {
    if rack > 0x0F {
        return Err(S7Error::InvalidRack(rack));
    }
    if slot > 0x0F {
        return Err(S7Error::InvalidSlot(slot));
    }
    Ok(())
}

/// Default TSAP pair for a controller family addressed by rack and slot.
pub fn default_tsap_pair(controller: ControllerType, rack: u8, slot: u8) -> S7Result<TsapPair> {
    validate_rack_slot(rack, slot)?;

    let pair = match controller {
        ControllerType::Logo => TsapPair {
            local: Tsap(0x01, 0x00),
            remote: Tsap(0x01, 0x02),
        },
        ControllerType::Any
        | ControllerType::S7300
        | ControllerType::S7400
        | ControllerType::S71200
        | ControllerType::S71500 => TsapPair {
            local: Tsap::from_group(DeviceGroup::PgOrPc, 0, 0),
            remote: Tsap::from_group(DeviceGroup::Others, rack, slot),
        },
    };

    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!("03:01".parse::<Tsap>().unwrap(), Tsap(0x03, 0x01));
        assert_eq!("0x0301".parse::<Tsap>().unwrap(), Tsap(0x03, 0x01));
        assert_eq!("769".parse::<Tsap>().unwrap(), Tsap(0x03, 0x01));
        assert!("zz".parse::<Tsap>().is_err());
        let pair: TsapPair = "0x0100/03:02".parse().unwrap();
        assert_eq!(u16::from(pair.local), 0x0100);
        assert_eq!(u16::from(pair.remote), 0x0302);
    }

    #[test]
    fn rack_slot_derivation() {
        let pair = default_tsap_pair(ControllerType::S7300, 0, 2).unwrap();
        assert_eq!(u16::from(pair.local), 0x0100);
        assert_eq!(u16::from(pair.remote), 0x0302);
        let pair = default_tsap_pair(ControllerType::S71500, 1, 1).unwrap();
        assert_eq!(u16::from(pair.remote), 0x0321);
        let logo = default_tsap_pair(ControllerType::Logo, 0, 0).unwrap();
        assert_eq!(u16::from(logo.remote), 0x0102);
        assert!(matches!(
            default_tsap_pair(ControllerType::Any, 16, 0),
            Err(S7Error::InvalidRack(16))
        ));
        assert!(matches!(
            default_tsap_pair(ControllerType::Any, 0, 16),
            Err(S7Error::InvalidSlot(16))
        ));
    }
}
