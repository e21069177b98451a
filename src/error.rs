//! Error types for EtherNet/IP operations.

use crate::types::CipStatus;
use std::io;
use thiserror::Error;

/// Errors that can occur during EtherNet/IP and CIP operations.
#[derive(Error, Debug)]
pub enum EipError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A fixed binary record failed to decode.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Frame too short to contain the record being decoded.
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// No tag with this name exists in the store.
    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    /// Requested element count does not fit the tag.
    #[error("Count mismatch on {tag}: requested {requested}, available {available}")]
    CountMismatch {
        tag: String,
        requested: usize,
        available: usize,
    },

    /// Payload length does not match the declared type and count.
    #[error("Length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Tag path text does not follow the path grammar.
    #[error("Path syntax error: {0}")]
    PathSyntax(String),

    /// Service code not handled by this device.
    #[error("Unsupported service: 0x{0:02X}")]
    UnsupportedService(u8),

    /// Encapsulation command not handled by this device.
    #[error("Unsupported command: 0x{0:04X}")]
    UnsupportedCommand(u16),

    /// Structure definition references a type that is not known.
    #[error("Undefined type: {0}")]
    UndefinedType(String),

    /// Value shape cannot be turned into a tag.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Structure definition lists the same member twice.
    #[error("Duplicate member {member} in structure {structure}")]
    DuplicateMember { structure: String, member: String },

    /// CIP service failed on the remote device.
    #[error("CIP service 0x{service:02X} failed: {status:?}")]
    Cip { service: u8, status: CipStatus },

    /// Encapsulation layer reported a non-zero status.
    #[error("Encapsulation status 0x{0:08X}")]
    Encapsulation(u32),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
}

/// Result type alias for EtherNet/IP operations.
pub type Result<T> = std::result::Result<T, EipError>;

impl EipError {
    /// Create a new malformed record error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    /// Create a new path syntax error.
    pub fn path_syntax(msg: impl Into<String>) -> Self {
        Self::PathSyntax(msg.into())
    }

    /// Check whether this error must terminate the connection it occurred on.
    ///
    /// Framing and I/O failures leave the byte stream in an unknown state;
    /// tag and type failures are reported to the peer as CIP status codes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::MalformedRecord(_)
                | Self::FrameTooShort { .. }
                | Self::ConnectionClosed
                | Self::Timeout
        )
    }

    /// Check if this error is recoverable (transient).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted
        ) || matches!(self, Self::Timeout)
    }
}
