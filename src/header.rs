//! Encapsulation header and ID newtypes.

use crate::error::{EipError, Result};
use crate::types::{encap_status, Command};

/// Size of the encapsulation header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Session handle - assigned by the target at RegisterSession.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionHandle(pub u32);

/// Connection ID - allocated by Forward Open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Encapsulation header (24 bytes, little-endian).
///
/// ```text
/// +----------------+----------------+
/// |  Command (16)  |  Length (16)   |
/// +----------------+----------------+
/// |       Session Handle (32)       |
/// +---------------------------------+
/// |           Status (32)           |
/// +---------------------------------+
/// |       Sender Context (64)       |
/// |                                 |
/// +---------------------------------+
/// |          Options (32)           |
/// +---------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncapsulationHeader {
    /// Raw command code; unknown commands are kept so they can be echoed.
    pub command: u16,
    /// Length of the data following the header.
    pub length: u16,
    /// Session handle.
    pub session_handle: SessionHandle,
    /// Status (0 on requests).
    pub status: u32,
    /// Opaque originator context, echoed in replies.
    pub sender_context: u64,
    /// Options (must be 0).
    pub options: u32,
}

impl EncapsulationHeader {
    /// Create a new header for the given command.
    pub fn new(command: Command) -> Self {
        Self {
            command: command as u16,
            ..Default::default()
        }
    }

    /// Create a reply header from a request header.
    ///
    /// Session handle, sender context and options are echoed; the length is
    /// set when the reply payload is attached.
    pub fn reply_from(request: &Self) -> Self {
        Self {
            command: request.command,
            length: 0,
            session_handle: request.session_handle,
            status: encap_status::SUCCESS,
            sender_context: request.sender_context,
            options: request.options,
        }
    }

    /// Decoded command, if known.
    pub fn command(&self) -> Option<Command> {
        Command::from_u16(self.command)
    }

    /// Parse a header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(EipError::FrameTooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        Ok(Self {
            command: u16::from_le_bytes([data[0], data[1]]),
            length: u16::from_le_bytes([data[2], data[3]]),
            session_handle: SessionHandle(u32::from_le_bytes([
                data[4], data[5], data[6], data[7],
            ])),
            status: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            sender_context: u64::from_le_bytes([
                data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
            ]),
            options: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
        })
    }

    /// Serialize the header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..2].copy_from_slice(&self.command.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.session_handle.0.to_le_bytes());
        buf[8..12].copy_from_slice(&self.status.to_le_bytes());
        buf[12..20].copy_from_slice(&self.sender_context.to_le_bytes());
        buf[20..24].copy_from_slice(&self.options.to_le_bytes());

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = EncapsulationHeader {
            command: Command::SendRRData as u16,
            length: 30,
            session_handle: SessionHandle(0x1122_3344),
            status: 0,
            sender_context: 0x0102_0304_0506_0708,
            options: 0,
        };

        let parsed = EncapsulationHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(header, parsed);
        assert_eq!(parsed.command(), Some(Command::SendRRData));
    }

    #[test]
    fn test_header_byte_order() {
        let mut header = EncapsulationHeader::new(Command::RegisterSession);
        header.length = 4;
        header.session_handle = SessionHandle(0xAABBCCDD);

        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..2], &[0x65, 0x00]);
        assert_eq!(&bytes[2..4], &[0x04, 0x00]);
        assert_eq!(&bytes[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn test_reply_from_echoes_context() {
        let mut request = EncapsulationHeader::new(Command::ListIdentity);
        request.sender_context = 42;
        request.length = 0;
        request.status = 7;

        let reply = EncapsulationHeader::reply_from(&request);
        assert_eq!(reply.sender_context, 42);
        assert_eq!(reply.status, encap_status::SUCCESS);
        assert_eq!(reply.command(), Some(Command::ListIdentity));
    }

    #[test]
    fn test_parse_too_short() {
        let result = EncapsulationHeader::from_bytes(&[0u8; 10]);
        assert!(matches!(result, Err(EipError::FrameTooShort { .. })));
    }

    #[test]
    fn test_unknown_command_kept() {
        let mut bytes = EncapsulationHeader::default().to_bytes();
        bytes[0] = 0x72;
        let header = EncapsulationHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.command, 0x72);
        assert_eq!(header.command(), None);
    }
}
