//! Core EtherNet/IP and CIP types and constants.

/// Encapsulation protocol version (always 1).
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Encapsulation commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// No operation, never answered.
    Nop = 0x0000,
    /// Query the encapsulation services offered.
    ListServices = 0x0004,
    /// Query the device identity.
    ListIdentity = 0x0063,
    /// Query the non-CIP interfaces.
    ListInterfaces = 0x0064,
    /// Open a session.
    RegisterSession = 0x0065,
    /// Close a session.
    UnregisterSession = 0x0066,
    /// Unconnected request/response data.
    SendRRData = 0x006F,
    /// Connected data.
    SendUnitData = 0x0070,
}

impl Command {
    /// Create a Command from a raw value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Nop),
            0x0004 => Some(Self::ListServices),
            0x0063 => Some(Self::ListIdentity),
            0x0064 => Some(Self::ListInterfaces),
            0x0065 => Some(Self::RegisterSession),
            0x0066 => Some(Self::UnregisterSession),
            0x006F => Some(Self::SendRRData),
            0x0070 => Some(Self::SendUnitData),
            _ => None,
        }
    }

    /// Check if this command is valid on the UDP port.
    pub fn allowed_on_udp(&self) -> bool {
        matches!(
            self,
            Self::ListServices | Self::ListIdentity | Self::ListInterfaces
        )
    }
}

/// Encapsulation header status codes.
pub mod encap_status {
    /// Success.
    pub const SUCCESS: u32 = 0x0000;
    /// Unknown or unsupported command.
    pub const INVALID_COMMAND: u32 = 0x0001;
    /// Out of memory.
    pub const NO_MEMORY: u32 = 0x0002;
    /// Incorrect data in the encapsulation body.
    pub const INCORRECT_DATA: u32 = 0x0003;
    /// Session handle not registered.
    pub const INVALID_SESSION_HANDLE: u32 = 0x0064;
    /// Invalid length.
    pub const INVALID_LENGTH: u32 = 0x0065;
    /// Unsupported encapsulation protocol revision.
    pub const UNSUPPORTED_PROTOCOL: u32 = 0x0069;
}

/// Common packet format item types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ItemType {
    /// Null address (unconnected).
    NullAddress = 0x0000,
    /// Identity record in a ListIdentity reply.
    ListIdentity = 0x000C,
    /// Connected address, carries the connection ID.
    ConnectedAddress = 0x00A1,
    /// Connected data, starts with a sequence count.
    ConnectedData = 0x00B1,
    /// Unconnected data.
    UnconnectedData = 0x00B2,
    /// Service record in a ListServices reply.
    ListServices = 0x0100,
    /// Originator-to-target socket address.
    SockAddrOT = 0x8000,
    /// Target-to-originator socket address.
    SockAddrTO = 0x8001,
    /// Sequenced address.
    SequencedAddress = 0x8002,
}

impl ItemType {
    /// Create an ItemType from a raw value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::NullAddress),
            0x000C => Some(Self::ListIdentity),
            0x00A1 => Some(Self::ConnectedAddress),
            0x00B1 => Some(Self::ConnectedData),
            0x00B2 => Some(Self::UnconnectedData),
            0x0100 => Some(Self::ListServices),
            0x8000 => Some(Self::SockAddrOT),
            0x8001 => Some(Self::SockAddrTO),
            0x8002 => Some(Self::SequencedAddress),
            _ => None,
        }
    }
}

/// CIP service code.
///
/// Several class-specific services share a code; the addressed class
/// decides which one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceCode(pub u8);

impl ServiceCode {
    pub const GET_ATTRIBUTE_ALL: Self = Self(0x01);
    pub const GET_ATTRIBUTE_LIST: Self = Self(0x03);
    pub const RESET: Self = Self(0x05);
    pub const MULTIPLE_SERVICE_PACKET: Self = Self(0x0A);
    pub const GET_ATTRIBUTE_SINGLE: Self = Self(0x0E);
    pub const READ_TAG: Self = Self(0x4C);
    pub const READ_TEMPLATE: Self = Self(0x4C);
    pub const WRITE_TAG: Self = Self(0x4D);
    pub const FORWARD_CLOSE: Self = Self(0x4E);
    pub const READ_MODIFY_WRITE: Self = Self(0x4E);
    pub const UNCONNECTED_SEND: Self = Self(0x52);
    pub const READ_TAG_FRAGMENTED: Self = Self(0x52);
    pub const WRITE_TAG_FRAGMENTED: Self = Self(0x53);
    pub const FORWARD_OPEN: Self = Self(0x54);
    pub const GET_INSTANCE_ATTRIBUTE_LIST: Self = Self(0x55);
    pub const LARGE_FORWARD_OPEN: Self = Self(0x5B);

    /// Bit set on every reply service code.
    pub const REPLY_FLAG: u8 = 0x80;

    /// The reply code for this service.
    pub fn reply(&self) -> u8 {
        self.0 | Self::REPLY_FLAG
    }

    /// Check if this code is a reply.
    pub fn is_reply(&self) -> bool {
        self.0 & Self::REPLY_FLAG != 0
    }
}

impl std::fmt::Display for ServiceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// CIP object class identifiers used by this device.
pub mod class {
    pub const IDENTITY: u32 = 0x01;
    pub const MESSAGE_ROUTER: u32 = 0x02;
    pub const CONNECTION_MANAGER: u32 = 0x06;
    pub const SYMBOL: u32 = 0x6B;
    pub const TEMPLATE: u32 = 0x6C;
}

/// CIP general status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CipStatus {
    /// Service completed.
    #[default]
    Success = 0x00,
    /// Connection failure.
    ConnectionFailure = 0x01,
    /// Path segment error; also the generic tag read/write failure.
    PathSegmentError = 0x04,
    /// Path destination unknown.
    PathUnknown = 0x05,
    /// Only part of the data was transferred.
    PartialTransfer = 0x06,
    /// Service not supported.
    ServiceNotSupported = 0x08,
    /// Attribute list error.
    AttributeListError = 0x0A,
    /// Too much data.
    TooMuchData = 0x15,
    /// Attribute not supported.
    AttributeNotSupported = 0x14,
    /// Object does not exist.
    ObjectDoesNotExist = 0x16,
    /// Not enough data.
    NotEnoughData = 0x13,
    /// Embedded service error.
    EmbeddedServiceError = 0x1E,
    /// Invalid parameter.
    InvalidParameter = 0x20,
}

impl CipStatus {
    /// Create a CipStatus from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::ConnectionFailure),
            0x04 => Some(Self::PathSegmentError),
            0x05 => Some(Self::PathUnknown),
            0x06 => Some(Self::PartialTransfer),
            0x08 => Some(Self::ServiceNotSupported),
            0x0A => Some(Self::AttributeListError),
            0x13 => Some(Self::NotEnoughData),
            0x14 => Some(Self::AttributeNotSupported),
            0x15 => Some(Self::TooMuchData),
            0x16 => Some(Self::ObjectDoesNotExist),
            0x1E => Some(Self::EmbeddedServiceError),
            0x20 => Some(Self::InvalidParameter),
            _ => None,
        }
    }

    /// Check if this status indicates success.
    pub fn is_ok(&self) -> bool {
        *self == Self::Success
    }

    /// Check if the reply still carries usable data.
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Success | Self::PartialTransfer)
    }
}

/// Array dimension flags carried in symbol and member type words.
pub const TYPE_ARRAY_1D: u16 = 0x2000;
pub const TYPE_ARRAY_2D: u16 = 0x4000;
pub const TYPE_ARRAY_3D: u16 = 0x6000;
/// Structure flag carried in symbol and member type words.
pub const TYPE_STRUCT: u16 = 0x8000;
/// Mask selecting the type code from a type word.
pub const TYPE_CODE_MASK: u16 = 0x0FFF;
/// Type word preceding the structure handle in struct tag reads/writes.
pub const STRUCT_TYPE_PREFIX: u16 = 0x02A0;

/// CIP elementary data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DataType {
    Bool = 0xC1,
    Sint = 0xC2,
    Int = 0xC3,
    Dint = 0xC4,
    Lint = 0xC5,
    Usint = 0xC6,
    Uint = 0xC7,
    Udint = 0xC8,
    Ulint = 0xC9,
    Real = 0xCA,
    Lreal = 0xCB,
    Stime = 0xCC,
    Date = 0xCD,
    TimeOfDay = 0xCE,
    DateTime = 0xCF,
    String = 0xD0,
    Byte = 0xD1,
    Word = 0xD2,
    Dword = 0xD3,
    Lword = 0xD4,
    String2 = 0xD5,
    Ftime = 0xD6,
    Ltime = 0xD7,
    Itime = 0xD8,
    StringN = 0xD9,
    ShortString = 0xDA,
    Time = 0xDB,
    Epath = 0xDC,
    EngUnit = 0xDD,
    StringI = 0xDE,
}

impl DataType {
    const ALL: [DataType; 30] = [
        Self::Bool,
        Self::Sint,
        Self::Int,
        Self::Dint,
        Self::Lint,
        Self::Usint,
        Self::Uint,
        Self::Udint,
        Self::Ulint,
        Self::Real,
        Self::Lreal,
        Self::Stime,
        Self::Date,
        Self::TimeOfDay,
        Self::DateTime,
        Self::String,
        Self::Byte,
        Self::Word,
        Self::Dword,
        Self::Lword,
        Self::String2,
        Self::Ftime,
        Self::Ltime,
        Self::Itime,
        Self::StringN,
        Self::ShortString,
        Self::Time,
        Self::Epath,
        Self::EngUnit,
        Self::StringI,
    ];

    /// Create a DataType from a type word, ignoring array flags.
    pub fn from_u16(value: u16) -> Option<Self> {
        let code = value & TYPE_CODE_MASK;
        Self::ALL.iter().copied().find(|t| *t as u16 == code)
    }

    /// Look a type up by its IEC name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Wire code of this type.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Size in bytes of one element.
    ///
    /// String types are stored as raw byte (or word) sequences, so their
    /// element is the character unit.
    pub fn element_len(&self) -> usize {
        match self {
            Self::Bool | Self::Sint | Self::Usint | Self::Byte => 1,
            Self::Int | Self::Uint | Self::Word | Self::Date | Self::Itime => 2,
            Self::Dint | Self::Udint | Self::Real | Self::Dword => 4,
            Self::Stime | Self::TimeOfDay | Self::Ftime | Self::Time => 4,
            Self::Lint | Self::Ulint | Self::Lreal | Self::Lword | Self::Ltime => 8,
            Self::DateTime => 6,
            Self::String2 | Self::EngUnit => 2,
            Self::String | Self::StringN | Self::ShortString | Self::Epath | Self::StringI => 1,
        }
    }

    /// IEC name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Sint => "SINT",
            Self::Int => "INT",
            Self::Dint => "DINT",
            Self::Lint => "LINT",
            Self::Usint => "USINT",
            Self::Uint => "UINT",
            Self::Udint => "UDINT",
            Self::Ulint => "ULINT",
            Self::Real => "REAL",
            Self::Lreal => "LREAL",
            Self::Stime => "STIME",
            Self::Date => "DATE",
            Self::TimeOfDay => "TIMEOFDAY",
            Self::DateTime => "DATETIME",
            Self::String => "STRING",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
            Self::Dword => "DWORD",
            Self::Lword => "LWORD",
            Self::String2 => "STRING2",
            Self::Ftime => "FTIME",
            Self::Ltime => "LTIME",
            Self::Itime => "ITIME",
            Self::StringN => "STRINGN",
            Self::ShortString => "SHORTSTRING",
            Self::Time => "TIME",
            Self::Epath => "EPATH",
            Self::EngUnit => "ENGUNIT",
            Self::StringI => "STRINGI",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Array flag for a tag with `rank` used dimensions.
pub fn array_flag(rank: usize) -> u16 {
    match rank {
        0 => 0,
        1 => TYPE_ARRAY_1D,
        2 => TYPE_ARRAY_2D,
        _ => TYPE_ARRAY_3D,
    }
}
