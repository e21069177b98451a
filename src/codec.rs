//! Fixed-layout little-endian record codec.
//!
//! Every record on the wire (item descriptors, send-data headers, session
//! registration, connection manager requests) implements [`Record`], so the
//! layout lives in exactly one place and decode failures surface as
//! [`EipError::MalformedRecord`].

use bytes::{Buf, BufMut, Bytes};

use crate::error::{EipError, Result};
use crate::types::PROTOCOL_VERSION;

/// A fixed-size binary record.
pub trait Record: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Human readable name used in decode errors.
    const NAME: &'static str;

    /// Decode the record, advancing the buffer.
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure(buf, Self::SIZE, Self::NAME)?;
        Ok(Self::decode_unchecked(buf))
    }

    /// Decode assuming at least [`Record::SIZE`] bytes remain.
    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self;

    /// Append the record to the buffer.
    fn encode<B: BufMut>(&self, buf: &mut B);

    /// Encode into a fresh vector.
    fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.encode(&mut out);
        out
    }
}

/// Fail with a malformed-record error unless `needed` bytes remain.
pub fn ensure<B: Buf>(buf: &B, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(EipError::malformed(format!(
            "{what}: need {needed} bytes, {} available",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Take exactly `len` bytes off the buffer.
pub fn take_bytes<B: Buf>(buf: &mut B, len: usize, what: &str) -> Result<Bytes> {
    ensure(buf, len, what)?;
    Ok(buf.copy_to_bytes(len))
}

/// Read a little-endian u8.
pub fn get_u8<B: Buf>(buf: &mut B, what: &str) -> Result<u8> {
    ensure(buf, 1, what)?;
    Ok(buf.get_u8())
}

/// Read a little-endian u16.
pub fn get_u16<B: Buf>(buf: &mut B, what: &str) -> Result<u16> {
    ensure(buf, 2, what)?;
    Ok(buf.get_u16_le())
}

/// Read a little-endian u32.
pub fn get_u32<B: Buf>(buf: &mut B, what: &str) -> Result<u32> {
    ensure(buf, 4, what)?;
    Ok(buf.get_u32_le())
}

/// Common packet format item descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemHeader {
    /// Item type code.
    pub item_type: u16,
    /// Length of the item payload.
    pub length: u16,
}

impl Record for ItemHeader {
    const SIZE: usize = 4;
    const NAME: &'static str = "item header";

    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self {
        Self {
            item_type: buf.get_u16_le(),
            length: buf.get_u16_le(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.item_type);
        buf.put_u16_le(self.length);
    }
}

/// Body prefix of SendRRData / SendUnitData.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendDataHeader {
    /// Interface handle (0 for CIP).
    pub interface_handle: u32,
    /// Timeout in seconds.
    pub timeout: u16,
    /// Number of items that follow.
    pub item_count: u16,
}

impl Record for SendDataHeader {
    const SIZE: usize = 8;
    const NAME: &'static str = "send data header";

    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self {
        Self {
            interface_handle: buf.get_u32_le(),
            timeout: buf.get_u16_le(),
            item_count: buf.get_u16_le(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.interface_handle);
        buf.put_u16_le(self.timeout);
        buf.put_u16_le(self.item_count);
    }
}

/// RegisterSession command data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSessionData {
    /// Requested protocol version.
    pub protocol_version: u16,
    /// Option flags (must be 0).
    pub options: u16,
}

impl Default for RegisterSessionData {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            options: 0,
        }
    }
}

impl Record for RegisterSessionData {
    const SIZE: usize = 4;
    const NAME: &'static str = "register session data";

    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self {
        Self {
            protocol_version: buf.get_u16_le(),
            options: buf.get_u16_le(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.protocol_version);
        buf.put_u16_le(self.options);
    }
}

/// ListServices capability flag: CIP over TCP.
pub const CAPABILITY_TCP: u16 = 0x0020;
/// ListServices capability flag: CIP class 0/1 over UDP.
pub const CAPABILITY_UDP: u16 = 0x0100;

/// Service record carried in a ListServices reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Protocol version.
    pub protocol_version: u16,
    /// Capability flags.
    pub capability_flags: u16,
    /// NUL-padded service name.
    pub name: [u8; 16],
}

impl ServiceInfo {
    /// The single "Communications" service this device offers.
    pub fn communications() -> Self {
        let mut name = [0u8; 16];
        name[..14].copy_from_slice(b"Communications");
        Self {
            protocol_version: PROTOCOL_VERSION,
            capability_flags: CAPABILITY_TCP,
            name,
        }
    }
}

impl Record for ServiceInfo {
    const SIZE: usize = 20;
    const NAME: &'static str = "service info";

    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self {
        let protocol_version = buf.get_u16_le();
        let capability_flags = buf.get_u16_le();
        let mut name = [0u8; 16];
        buf.copy_to_slice(&mut name);
        Self {
            protocol_version,
            capability_flags,
            name,
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.protocol_version);
        buf.put_u16_le(self.capability_flags);
        buf.put_slice(&self.name);
    }
}

/// `sockaddr_in` as carried in ListIdentity; the only big-endian record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketAddress {
    /// Address family (2 = AF_INET).
    pub family: u16,
    /// TCP port.
    pub port: u16,
    /// IPv4 address octets.
    pub addr: [u8; 4],
}

impl SocketAddress {
    /// Build from an IPv4 socket address.
    pub fn from_v4(addr: std::net::SocketAddrV4) -> Self {
        Self {
            family: 2,
            port: addr.port(),
            addr: addr.ip().octets(),
        }
    }
}

impl Record for SocketAddress {
    const SIZE: usize = 16;
    const NAME: &'static str = "socket address";

    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self {
        let family = buf.get_u16();
        let port = buf.get_u16();
        let mut addr = [0u8; 4];
        buf.copy_to_slice(&mut addr);
        buf.advance(8);
        Self { family, port, addr }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.family);
        buf.put_u16(self.port);
        buf.put_slice(&self.addr);
        buf.put_bytes(0, 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_header_layout() {
        let item = ItemHeader {
            item_type: 0x00B2,
            length: 0x0102,
        };
        assert_eq!(item.to_vec(), vec![0xB2, 0x00, 0x02, 0x01]);
    }

    #[test]
    fn test_send_data_header_decode() {
        let mut data: &[u8] = &[0, 0, 0, 0, 0x0A, 0x00, 0x02, 0x00, 0xFF];
        let header = SendDataHeader::decode(&mut data).unwrap();
        assert_eq!(header.timeout, 10);
        assert_eq!(header.item_count, 2);
        assert_eq!(data, &[0xFF]);
    }

    #[test]
    fn test_short_record_is_malformed() {
        let mut data: &[u8] = &[0x01, 0x00];
        let result = RegisterSessionData::decode(&mut data);
        assert!(matches!(result, Err(EipError::MalformedRecord(_))));
    }

    #[test]
    fn test_service_info_name() {
        let bytes = ServiceInfo::communications().to_vec();
        assert_eq!(bytes.len(), ServiceInfo::SIZE);
        assert_eq!(&bytes[0..4], &[0x01, 0x00, 0x20, 0x00]);
        assert_eq!(&bytes[4..18], b"Communications");
        assert_eq!(&bytes[18..], &[0, 0]);
    }

    #[test]
    fn test_socket_address_big_endian() {
        let addr = SocketAddress::from_v4("192.168.1.10:44818".parse().unwrap());
        let bytes = addr.to_vec();
        assert_eq!(&bytes[0..2], &[0x00, 0x02]);
        assert_eq!(&bytes[2..4], &[0xAF, 0x12]);
        assert_eq!(&bytes[4..8], &[192, 168, 1, 10]);
        assert_eq!(&bytes[8..], &[0u8; 8]);
    }

    #[test]
    fn test_take_bytes() {
        let mut data: &[u8] = &[1, 2, 3];
        assert_eq!(take_bytes(&mut data, 2, "x").unwrap().as_ref(), &[1, 2]);
        assert!(take_bytes(&mut data, 2, "x").is_err());
    }
}
