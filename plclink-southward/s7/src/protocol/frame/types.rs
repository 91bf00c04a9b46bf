use serde::{Deserialize, Serialize};

/// Declare a `repr(u8)` wire enum together with its code conversions.
///
/// Decoding goes through `TryFrom<u64>` so the field helpers in
/// `plclink_sdk::wire::field` can read codes of any bit width.
macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $code ),+
        }

        impl $name {
            #[inline]
            pub fn code(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ();

            fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
                match v {
                    $( x if x == $code => Ok($name::$variant), )+
                    _ => Err(()),
                }
            }
        }

        impl TryFrom<u64> for $name {
            type Error = ();

            fn try_from(v: u64) -> std::result::Result<Self, Self::Error> {
                u8::try_from(v).map_err(|_| ()).and_then(Self::try_from)
            }
        }
    };
}

code_enum! {
    /// COTP TPDU type values
    pub enum CotpType {
        /// Connection Request
        Cr = 0xE0,
        /// Connection Confirm
        Cc = 0xD0,
        /// Disconnection Request
        Dr = 0x80,
        /// Disconnection Confirm
        Dc = 0xC0,
        /// TPDU Error
        Er = 0x70,
        /// Data
        D = 0xF0,
    }
}

code_enum! {
    /// COTP variable-part parameter codes
    pub enum CotpParameterType {
        TpduSize = 0xC0,
        CallingTsap = 0xC1,
        CalledTsap = 0xC2,
        Checksum = 0xC3,
        DisconnectAdditionalInformation = 0xE0,
    }
}

code_enum! {
    /// COTP transport protocol class
    pub enum CotpProtocolClass {
        Class0 = 0x00,
        Class1 = 0x10,
        Class2 = 0x20,
        Class3 = 0x30,
        Class4 = 0x40,
    }
}

code_enum! {
    /// Negotiated maximum COTP TPDU size, encoded as a power of two
    pub enum CotpTpduSize {
        Size128 = 0x07,
        Size256 = 0x08,
        Size512 = 0x09,
        Size1024 = 0x0A,
        Size2048 = 0x0B,
        Size4096 = 0x0C,
        Size8192 = 0x0D,
    }
}

impl CotpTpduSize {
    const ALL: [CotpTpduSize; 7] = [
        CotpTpduSize::Size128,
        CotpTpduSize::Size256,
        CotpTpduSize::Size512,
        CotpTpduSize::Size1024,
        CotpTpduSize::Size2048,
        CotpTpduSize::Size4096,
        CotpTpduSize::Size8192,
    ];

    #[inline]
    pub fn size_in_bytes(self) -> u16 {
        1u16 << self.code()
    }

    /// Smallest TPDU size that can carry `pdu_size` bytes, capped at 8192.
    pub fn nearest_for(pdu_size: u16) -> CotpTpduSize {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.size_in_bytes() >= pdu_size)
            .unwrap_or(CotpTpduSize::Size8192)
    }
}

code_enum! {
    /// S7 PDU (ROSCTR) kinds
    pub enum S7MessageType {
        Request = 0x01,
        Response = 0x02,
        ResponseData = 0x03,
        UserData = 0x07,
    }
}

code_enum! {
    /// S7 parameter function codes
    pub enum S7ParameterType {
        /// CPU services (only valid in UserData PDUs)
        UserData = 0x00,
        ReadVar = 0x04,
        WriteVar = 0x05,
        SetupCommunication = 0xF0,
    }
}

code_enum! {
    /// S7 memory areas addressed by S7-Any pointers
    pub enum MemoryArea {
        Counters = 0x1C,
        Timers = 0x1D,
        DirectPeripheralAccess = 0x80,
        Inputs = 0x81,
        Outputs = 0x82,
        FlagsMarkers = 0x83,
        DataBlocks = 0x84,
        InstanceDataBlocks = 0x85,
        LocalData = 0x86,
    }
}

impl MemoryArea {
    const ALL: [MemoryArea; 9] = [
        MemoryArea::Counters,
        MemoryArea::Timers,
        MemoryArea::DirectPeripheralAccess,
        MemoryArea::Inputs,
        MemoryArea::Outputs,
        MemoryArea::FlagsMarkers,
        MemoryArea::DataBlocks,
        MemoryArea::InstanceDataBlocks,
        MemoryArea::LocalData,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            MemoryArea::Counters => "C",
            MemoryArea::Timers => "T",
            MemoryArea::DirectPeripheralAccess => "D",
            MemoryArea::Inputs => "I",
            MemoryArea::Outputs => "Q",
            MemoryArea::FlagsMarkers => "M",
            MemoryArea::DataBlocks => "DB",
            MemoryArea::InstanceDataBlocks => "DBI",
            MemoryArea::LocalData => "LD",
        }
    }

    pub fn from_short_name(name: &str) -> Option<MemoryArea> {
        Self::ALL.iter().copied().find(|a| a.short_name() == name)
    }
}

code_enum! {
    /// Transport size code carried inside an S7-Any address
    pub enum S7TransportSize {
        Bit = 0x01,
        Byte = 0x02,
        Char = 0x03,
        Word = 0x04,
        Int = 0x05,
        DWord = 0x06,
        DInt = 0x07,
        Real = 0x08,
        Date = 0x09,
        TimeOfDay = 0x0A,
        Time = 0x0B,
        S5Time = 0x0C,
        DateTime = 0x0F,
        Counter = 0x1C,
        Timer = 0x1D,
        IecTimer = 0x1E,
        IecCounter = 0x1F,
        HsCounter = 0x20,
    }
}

code_enum! {
    /// Transport size of a data item in ReadVar/WriteVar payloads
    pub enum DataTransportSize {
        Null = 0x00,
        Bit = 0x03,
        ByteWordDword = 0x04,
        Integer = 0x05,
        DInteger = 0x06,
        Real = 0x07,
        OctetString = 0x09,
    }
}

impl DataTransportSize {
    /// Whether the item length field counts bits rather than bytes.
    #[inline]
    pub fn size_in_bits(self) -> bool {
        matches!(
            self,
            DataTransportSize::Bit | DataTransportSize::ByteWordDword | DataTransportSize::Integer
        )
    }
}

code_enum! {
    /// Per-item return code in data payloads
    pub enum DataTransportErrorCode {
        Reserved = 0x00,
        AccessDenied = 0x03,
        InvalidAddress = 0x05,
        DataTypeNotSupported = 0x06,
        NotFound = 0x0A,
        Ok = 0xFF,
    }
}

code_enum! {
    /// Module class of a system status list id
    pub enum SzlModuleTypeClass {
        Cpu = 0x0,
        Im = 0x4,
        Fm = 0x8,
        Cp = 0xC,
    }
}

code_enum! {
    /// System status list sublists
    pub enum SzlSublist {
        ModuleIdentification = 0x11,
        CpuFeatures = 0x12,
        UserMemoryAreas = 0x13,
        SystemAreas = 0x14,
        BlockTypes = 0x15,
        StatusModuleLeds = 0x19,
        ComponentIdentification = 0x1C,
        InterruptStatus = 0x22,
        CommunicationStatusData = 0x32,
        StatusSingleModuleLed = 0x74,
        DpMasterSystemInformation = 0x90,
        ModuleStatusInformation = 0x91,
        RackOrStationStatusInformation = 0x92,
        ModuleStatusInformationProfinet = 0x96,
        DiagnosticBuffer = 0xA0,
        ModuleDiagnosticData = 0xB1,
    }
}

/// Family of the remote controller. `Any` means "not yet known" and
/// triggers identification during connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ControllerType {
    #[default]
    #[serde(rename = "ANY")]
    Any,
    #[serde(rename = "S7_300")]
    S7300,
    #[serde(rename = "S7_400")]
    S7400,
    #[serde(rename = "S7_1200")]
    S71200,
    #[serde(rename = "S7_1500")]
    S71500,
    #[serde(rename = "LOGO")]
    Logo,
}

impl ControllerType {
    /// Derive the family from a module article number such as
    /// `6ES7 511-1AK00-0AB0`.
    ///
    /// Numbers without the `6ES7 ` prefix are not classified.
    pub fn from_article_number(article: &str) -> ControllerType {
        let Some(rest) = article.trim().strip_prefix("6ES7 ") else {
            return ControllerType::Any;
        };
        match rest.chars().next() {
            Some('2') => ControllerType::S71200,
            Some('5') => ControllerType::S71500,
            Some('3') => ControllerType::S7300,
            Some('4') => ControllerType::S7400,
            _ => ControllerType::Any,
        }
    }
}

/// Device group used for TSAP derivation
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceGroup {
    PgOrPc = 0x01,
    Os = 0x02,
    Others = 0x03,
}

/// Value-level S7 data types and their wire properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S7DataType {
    Bool,
    Byte,
    Word,
    DWord,
    LWord,
    Int,
    UInt,
    SInt,
    USInt,
    DInt,
    UDInt,
    LInt,
    ULInt,
    Real,
    LReal,
    Char,
    WChar,
    String,
    WString,
    Time,
    LTime,
    Date,
    TimeOfDay,
    DateAndTime,
}

impl S7DataType {
    pub fn from_name(name: &str) -> Option<S7DataType> {
        use S7DataType::*;
        Some(match name {
            "BOOL" => Bool,
            "BYTE" => Byte,
            "WORD" => Word,
            "DWORD" => DWord,
            "LWORD" => LWord,
            "INT" => Int,
            "UINT" => UInt,
            "SINT" => SInt,
            "USINT" => USInt,
            "DINT" => DInt,
            "UDINT" => UDInt,
            "LINT" => LInt,
            "ULINT" => ULInt,
            "REAL" => Real,
            "LREAL" => LReal,
            "CHAR" => Char,
            "WCHAR" => WChar,
            "STRING" => String,
            "WSTRING" => WString,
            "TIME" => Time,
            "LTIME" => LTime,
            "DATE" => Date,
            "TIME_OF_DAY" | "TOD" => TimeOfDay,
            "DATE_AND_TIME" | "DT" => DateAndTime,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use S7DataType::*;
        match self {
            Bool => "BOOL",
            Byte => "BYTE",
            Word => "WORD",
            DWord => "DWORD",
            LWord => "LWORD",
            Int => "INT",
            UInt => "UINT",
            SInt => "SINT",
            USInt => "USINT",
            DInt => "DINT",
            UDInt => "UDINT",
            LInt => "LINT",
            ULInt => "ULINT",
            Real => "REAL",
            LReal => "LREAL",
            Char => "CHAR",
            WChar => "WCHAR",
            String => "STRING",
            WString => "WSTRING",
            Time => "TIME",
            LTime => "LTIME",
            Date => "DATE",
            TimeOfDay => "TIME_OF_DAY",
            DateAndTime => "DATE_AND_TIME",
        }
    }

    /// Size code letter accepted in `X`/`B`/`W`/`D` address prefixes.
    /// There is no code for 8-byte types; they share `X` with BOOL.
    pub fn short_name(self) -> char {
        use S7DataType::*;
        match self {
            Bool => 'X',
            Byte | SInt | USInt | Char | String | WString => 'B',
            Word | Int | UInt | WChar | Date => 'W',
            DWord | DInt | UDInt | Real | Time | TimeOfDay => 'D',
            LWord | LInt | ULInt | LReal | LTime | DateAndTime => 'X',
        }
    }

    /// Size of one element in bytes. Strings report their per-character
    /// size; the header and declared length are added by the caller.
    pub fn size_in_bytes(self) -> usize {
        use S7DataType::*;
        match self {
            Bool | Byte | SInt | USInt | Char | String => 1,
            Word | Int | UInt | WChar | WString | Date => 2,
            DWord | DInt | UDInt | Real | Time | TimeOfDay => 4,
            LWord | LInt | ULInt | LReal | LTime | DateAndTime => 8,
        }
    }

    /// Transport size used in S7-Any addresses when the type maps one to
    /// one onto a wire code. `None` means the type is read as raw bytes.
    pub fn transport_size(self) -> Option<S7TransportSize> {
        use S7DataType::*;
        Some(match self {
            Bool => S7TransportSize::Bit,
            Byte | SInt | USInt => S7TransportSize::Byte,
            Char => S7TransportSize::Char,
            Word => S7TransportSize::Word,
            Int | UInt => S7TransportSize::Int,
            DWord => S7TransportSize::DWord,
            DInt | UDInt => S7TransportSize::DInt,
            Real => S7TransportSize::Real,
            _ => return None,
        })
    }

    /// Canonical data type for a transport size found in a raw address.
    pub fn from_transport_size(size: S7TransportSize) -> Option<S7DataType> {
        use S7DataType::*;
        Some(match size {
            S7TransportSize::Bit => Bool,
            S7TransportSize::Byte => Byte,
            S7TransportSize::Char => Char,
            S7TransportSize::Word => Word,
            S7TransportSize::Int => Int,
            S7TransportSize::DWord => DWord,
            S7TransportSize::DInt => DInt,
            S7TransportSize::Real => Real,
            S7TransportSize::Date => Date,
            S7TransportSize::TimeOfDay => TimeOfDay,
            S7TransportSize::Time => Time,
            S7TransportSize::DateTime => DateAndTime,
            _ => return None,
        })
    }

    /// Transport size announced for written data items.
    pub fn data_transport_size(self) -> DataTransportSize {
        use S7DataType::*;
        match self {
            Bool => DataTransportSize::Bit,
            Int | UInt | DInt | UDInt => DataTransportSize::Integer,
            Real => DataTransportSize::Real,
            _ => DataTransportSize::ByteWordDword,
        }
    }

    #[inline]
    pub fn is_string(self) -> bool {
        matches!(self, S7DataType::String | S7DataType::WString)
    }
}

impl std::fmt::Display for S7DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tpdu_size_matches_pdu() {
        assert_eq!(CotpTpduSize::nearest_for(1024), CotpTpduSize::Size1024);
        assert_eq!(CotpTpduSize::nearest_for(240), CotpTpduSize::Size256);
        assert_eq!(CotpTpduSize::nearest_for(9000), CotpTpduSize::Size8192);
        assert_eq!(CotpTpduSize::Size512.size_in_bytes(), 512);
    }

    #[test]
    fn codes_round_trip_through_try_from() {
        assert_eq!(MemoryArea::try_from(0x84u8), Ok(MemoryArea::DataBlocks));
        assert_eq!(MemoryArea::try_from(0x184u64), Err(()));
        assert_eq!(DataTransportErrorCode::try_from(0xFFu64), Ok(DataTransportErrorCode::Ok));
        assert_eq!(MemoryArea::from_short_name("Q"), Some(MemoryArea::Outputs));
        assert_eq!(MemoryArea::from_short_name("X"), None);
    }

    #[test]
    fn article_number_classifies_family() {
        assert_eq!(
            ControllerType::from_article_number("6ES7 511-1AK00-0AB0"),
            ControllerType::S71500
        );
        assert_eq!(
            ControllerType::from_article_number("6ES7 212-1BE40-0XB0"),
            ControllerType::S71200
        );
        assert_eq!(
            ControllerType::from_article_number("6ES7 315-2EH14-0AB0"),
            ControllerType::S7300
        );
        assert_eq!(
            ControllerType::from_article_number("6ED1052-1MD08-0BA1"),
            ControllerType::Any
        );
    }

    #[test]
    fn type_names_resolve_aliases() {
        assert_eq!(S7DataType::from_name("TOD"), Some(S7DataType::TimeOfDay));
        assert_eq!(S7DataType::from_name("DT"), Some(S7DataType::DateAndTime));
        assert_eq!(S7DataType::from_name("int"), None);
        assert_eq!(S7DataType::Int.short_name(), 'W');
        assert_eq!(S7DataType::LReal.short_name(), 'X');
        assert_eq!(S7DataType::Real.data_transport_size(), DataTransportSize::Real);
    }
}
