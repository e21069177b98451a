//! Encapsulation messages and the common packet format.

use bytes::{BufMut, Bytes};

use crate::codec::{take_bytes, ItemHeader, Record, SendDataHeader};
use crate::error::{EipError, Result};
use crate::header::{ConnectionId, EncapsulationHeader, SessionHandle, HEADER_SIZE};
use crate::types::{Command, ItemType};

/// Largest payload an encapsulation frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// A complete encapsulation message (header + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulationMessage {
    /// Message header.
    pub header: EncapsulationHeader,
    /// Command specific data.
    pub payload: Bytes,
}

impl EncapsulationMessage {
    /// Create a new message with the given header and payload.
    ///
    /// The header length is set from the payload.
    pub fn new(mut header: EncapsulationHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        header.length = payload.len().min(MAX_PAYLOAD_SIZE) as u16;
        Self { header, payload }
    }

    /// Create a request for the given command.
    pub fn request(
        command: Command,
        session_handle: SessionHandle,
        payload: impl Into<Bytes>,
    ) -> Self {
        let mut header = EncapsulationHeader::new(command);
        header.session_handle = session_handle;
        Self::new(header, payload)
    }

    /// Create a reply to this message.
    pub fn reply(&self, status: u32, payload: impl Into<Bytes>) -> Self {
        let mut header = EncapsulationHeader::reply_from(&self.header);
        header.status = status;
        Self::new(header, payload)
    }

    /// Parse a message from a datagram or buffered frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = EncapsulationHeader::from_bytes(data)?;
        let expected_total = HEADER_SIZE + header.length as usize;

        if data.len() < expected_total {
            return Err(EipError::FrameTooShort {
                expected: expected_total,
                actual: data.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&data[HEADER_SIZE..expected_total]);
        Ok(Self { header, payload })
    }

    /// Serialize the message to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_size());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Get the total message size (header + payload).
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Decoded command, if known.
    pub fn command(&self) -> Option<Command> {
        self.header.command()
    }

    /// Check if the encapsulation status indicates success.
    pub fn is_ok(&self) -> bool {
        self.header.status == 0
    }
}

/// One item of the common packet format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfItem {
    /// Raw item type.
    pub item_type: u16,
    /// Item payload.
    pub data: Bytes,
}

impl CpfItem {
    /// Create an item.
    pub fn new(item_type: ItemType, data: impl Into<Bytes>) -> Self {
        Self {
            item_type: item_type as u16,
            data: data.into(),
        }
    }

    /// Decoded item type, if known.
    pub fn kind(&self) -> Option<ItemType> {
        ItemType::from_u16(self.item_type)
    }
}

/// Body of SendRRData / SendUnitData and of the List* replies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommonPacket {
    /// Interface handle (0 for CIP).
    pub interface_handle: u32,
    /// Timeout in seconds.
    pub timeout: u16,
    /// Items in order.
    pub items: Vec<CpfItem>,
}

impl CommonPacket {
    /// Unconnected envelope: null address + unconnected data.
    pub fn unconnected(data: impl Into<Bytes>) -> Self {
        Self {
            items: vec![
                CpfItem::new(ItemType::NullAddress, Bytes::new()),
                CpfItem::new(ItemType::UnconnectedData, data),
            ],
            ..Default::default()
        }
    }

    /// Connected envelope: connection address + sequenced connected data.
    pub fn connected(connection_id: ConnectionId, sequence: u16, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(2 + data.len());
        payload.put_u16_le(sequence);
        payload.extend_from_slice(data);
        Self {
            items: vec![
                CpfItem::new(
                    ItemType::ConnectedAddress,
                    connection_id.0.to_le_bytes().to_vec(),
                ),
                CpfItem::new(ItemType::ConnectedData, payload),
            ],
            ..Default::default()
        }
    }

    /// Decode the send-data prefix and all items.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let header = SendDataHeader::decode(&mut buf)?;
        let items = Self::decode_items(&mut buf, header.item_count)?;
        Ok(Self {
            interface_handle: header.interface_handle,
            timeout: header.timeout,
            items,
        })
    }

    /// Decode an item list without the send-data prefix (List* replies).
    pub fn decode_item_list(data: &[u8]) -> Result<Vec<CpfItem>> {
        let mut buf = data;
        let count = crate::codec::get_u16(&mut buf, "item count")?;
        Self::decode_items(&mut buf, count)
    }

    fn decode_items(buf: &mut &[u8], count: u16) -> Result<Vec<CpfItem>> {
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let item = ItemHeader::decode(buf)?;
            let data = take_bytes(buf, item.length as usize, "item data")?;
            items.push(CpfItem {
                item_type: item.item_type,
                data,
            });
        }
        Ok(items)
    }

    /// Encode the send-data prefix and items.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        SendDataHeader {
            interface_handle: self.interface_handle,
            timeout: self.timeout,
            item_count: self.items.len() as u16,
        }
        .encode(&mut buf);
        Self::encode_items(&self.items, &mut buf);
        buf
    }

    /// Encode an item list prefixed by its count (List* replies).
    pub fn encode_item_list(items: &[CpfItem]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16_le(items.len() as u16);
        Self::encode_items(items, &mut buf);
        buf
    }

    fn encode_items(items: &[CpfItem], buf: &mut Vec<u8>) {
        for item in items {
            ItemHeader {
                item_type: item.item_type,
                length: item.data.len() as u16,
            }
            .encode(buf);
            buf.extend_from_slice(&item.data);
        }
    }

    /// Find the first item of the given type.
    pub fn item(&self, item_type: ItemType) -> Option<&CpfItem> {
        self.items.iter().find(|i| i.item_type == item_type as u16)
    }
}
