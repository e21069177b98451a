//! Forward Open / Forward Close records and the per-session connection table.

use std::collections::{HashMap, VecDeque};

use bytes::{Buf, BufMut, Bytes};
use tracing::{debug, warn};

use crate::codec::{Record, get_u8, get_u16, get_u32, take_bytes};
use crate::error::Result;
use crate::header::ConnectionId;
use crate::ids::IdGenerator;

/// Reply payload reserved for the CIP reply and item headers.
const REPLY_OVERHEAD: usize = 32;

/// Connections one session may hold before the oldest is dropped.
pub const MAX_CONNECTIONS: usize = 32;

/// Connection size bits of a 16-bit network parameter word.
const SIZE_MASK: u32 = 0x01FF;
/// Connection size bits of a 32-bit (large) network parameter word.
const LARGE_SIZE_MASK: u32 = 0xFFFF;

/// Forward Open / Large Forward Open request body.
///
/// Large Forward Open differs only in carrying 32-bit network parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardOpenRequest {
    pub priority_tick: u8,
    pub timeout_ticks: u8,
    pub ot_connection_id: u32,
    pub to_connection_id: u32,
    pub serial: u16,
    pub vendor_id: u16,
    pub originator_serial: u32,
    pub timeout_multiplier: u8,
    pub ot_rpi: u32,
    pub ot_params: u32,
    pub to_rpi: u32,
    pub to_params: u32,
    pub transport: u8,
    /// Connection path, padded to whole words.
    pub path: Bytes,
}

impl ForwardOpenRequest {
    /// Decode a request body; `large` selects 32-bit network parameters.
    pub fn decode<B: Buf>(buf: &mut B, large: bool) -> Result<Self> {
        let params = |buf: &mut B| -> Result<u32> {
            if large {
                get_u32(buf, "forward open parameters")
            } else {
                get_u16(buf, "forward open parameters").map(u32::from)
            }
        };

        let priority_tick = get_u8(buf, "forward open")?;
        let timeout_ticks = get_u8(buf, "forward open")?;
        let ot_connection_id = get_u32(buf, "forward open")?;
        let to_connection_id = get_u32(buf, "forward open")?;
        let serial = get_u16(buf, "forward open")?;
        let vendor_id = get_u16(buf, "forward open")?;
        let originator_serial = get_u32(buf, "forward open")?;
        let timeout_multiplier = get_u8(buf, "forward open")?;
        take_bytes(buf, 3, "forward open reserved")?;
        let ot_rpi = get_u32(buf, "forward open")?;
        let ot_params = params(buf)?;
        let to_rpi = get_u32(buf, "forward open")?;
        let to_params = params(buf)?;
        let transport = get_u8(buf, "forward open")?;
        let words = get_u8(buf, "forward open path size")?;
        let path = take_bytes(buf, words as usize * 2, "forward open path")?;

        Ok(Self {
            priority_tick,
            timeout_ticks,
            ot_connection_id,
            to_connection_id,
            serial,
            vendor_id,
            originator_serial,
            timeout_multiplier,
            ot_rpi,
            ot_params,
            to_rpi,
            to_params,
            transport,
            path,
        })
    }

    /// Encode the request body.
    pub fn encode(&self, buf: &mut Vec<u8>, large: bool) {
        let put_params = |buf: &mut Vec<u8>, value: u32| {
            if large {
                buf.put_u32_le(value);
            } else {
                buf.put_u16_le(value as u16);
            }
        };

        buf.put_u8(self.priority_tick);
        buf.put_u8(self.timeout_ticks);
        buf.put_u32_le(self.ot_connection_id);
        buf.put_u32_le(self.to_connection_id);
        buf.put_u16_le(self.serial);
        buf.put_u16_le(self.vendor_id);
        buf.put_u32_le(self.originator_serial);
        buf.put_u8(self.timeout_multiplier);
        buf.put_slice(&[0; 3]);
        buf.put_u32_le(self.ot_rpi);
        put_params(buf, self.ot_params);
        buf.put_u32_le(self.to_rpi);
        put_params(buf, self.to_params);
        buf.put_u8(self.transport);
        buf.put_u8((self.path.len() / 2) as u8);
        buf.put_slice(&self.path);
    }
}

/// Forward Open reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardOpenReply {
    pub ot_connection_id: u32,
    pub to_connection_id: u32,
    pub serial: u16,
    pub vendor_id: u16,
    pub originator_serial: u32,
    /// Actual O→T packet interval, echoed from the request.
    pub ot_api: u32,
    /// Actual T→O packet interval, echoed from the request.
    pub to_api: u32,
}

impl Record for ForwardOpenReply {
    const SIZE: usize = 26;
    const NAME: &'static str = "forward open reply";

    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self {
        let reply = Self {
            ot_connection_id: buf.get_u32_le(),
            to_connection_id: buf.get_u32_le(),
            serial: buf.get_u16_le(),
            vendor_id: buf.get_u16_le(),
            originator_serial: buf.get_u32_le(),
            ot_api: buf.get_u32_le(),
            to_api: buf.get_u32_le(),
        };
        // application reply size + reserved
        buf.advance(2);
        reply
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.ot_connection_id);
        buf.put_u32_le(self.to_connection_id);
        buf.put_u16_le(self.serial);
        buf.put_u16_le(self.vendor_id);
        buf.put_u32_le(self.originator_serial);
        buf.put_u32_le(self.ot_api);
        buf.put_u32_le(self.to_api);
        buf.put_u8(0);
        buf.put_u8(0);
    }
}

/// Forward Close request body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardCloseRequest {
    pub priority_tick: u8,
    pub timeout_ticks: u8,
    pub serial: u16,
    pub vendor_id: u16,
    pub originator_serial: u32,
    pub path: Bytes,
}

impl ForwardCloseRequest {
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let priority_tick = get_u8(buf, "forward close")?;
        let timeout_ticks = get_u8(buf, "forward close")?;
        let serial = get_u16(buf, "forward close")?;
        let vendor_id = get_u16(buf, "forward close")?;
        let originator_serial = get_u32(buf, "forward close")?;
        let words = get_u8(buf, "forward close path size")?;
        get_u8(buf, "forward close reserved")?;
        let path = take_bytes(buf, words as usize * 2, "forward close path")?;

        Ok(Self {
            priority_tick,
            timeout_ticks,
            serial,
            vendor_id,
            originator_serial,
            path,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.priority_tick);
        buf.put_u8(self.timeout_ticks);
        buf.put_u16_le(self.serial);
        buf.put_u16_le(self.vendor_id);
        buf.put_u32_le(self.originator_serial);
        buf.put_u8((self.path.len() / 2) as u8);
        buf.put_u8(0);
        buf.put_slice(&self.path);
    }
}

/// Forward Close reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardCloseReply {
    pub serial: u16,
    pub vendor_id: u16,
    pub originator_serial: u32,
}

impl Record for ForwardCloseReply {
    const SIZE: usize = 10;
    const NAME: &'static str = "forward close reply";

    fn decode_unchecked<B: Buf>(buf: &mut B) -> Self {
        let reply = Self {
            serial: buf.get_u16_le(),
            vendor_id: buf.get_u16_le(),
            originator_serial: buf.get_u32_le(),
        };
        buf.advance(2);
        reply
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.serial);
        buf.put_u16_le(self.vendor_id);
        buf.put_u32_le(self.originator_serial);
        buf.put_u8(0);
        buf.put_u8(0);
    }
}

/// A connection granted by Forward Open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Server-chosen originator-to-target ID; requests arrive addressed to it.
    pub ot_id: ConnectionId,
    /// Client-chosen target-to-originator ID; replies are addressed to it.
    pub to_id: ConnectionId,
    pub serial: u16,
    pub vendor_id: u16,
    pub originator_serial: u32,
    pub ot_rpi: u32,
    pub to_rpi: u32,
    pub ot_params: u32,
    pub to_params: u32,
    pub transport: u8,
    pub path: Bytes,
    /// Largest connected reply payload.
    pub max_reply: usize,
    /// Opened with Large Forward Open.
    pub large: bool,
}

impl Connection {
    /// Check whether a Forward Close names this connection.
    pub fn matches(&self, serial: u16, vendor_id: u16, originator_serial: u32) -> bool {
        self.serial == serial
            && self.vendor_id == vendor_id
            && self.originator_serial == originator_serial
    }
}

/// Largest reply payload allowed by the T→O network parameters.
pub fn max_reply_size(to_params: u32, large: bool) -> usize {
    let mask = if large { LARGE_SIZE_MASK } else { SIZE_MASK };
    ((to_params & mask) as usize).saturating_sub(REPLY_OVERHEAD)
}

/// Connections opened on one session.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, Connection>,
    /// O→T IDs, oldest first.
    order: VecDeque<ConnectionId>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a Forward Open, allocating a fresh O→T connection ID.
    ///
    /// A connection with the same triad is replaced. Past
    /// [`MAX_CONNECTIONS`] the oldest connection is dropped.
    pub fn open(
        &mut self,
        request: &ForwardOpenRequest,
        large: bool,
        ids: &dyn IdGenerator,
    ) -> ForwardOpenReply {
        let ot_id = ConnectionId(ids.next_u32());
        let connection = Connection {
            ot_id,
            to_id: ConnectionId(request.to_connection_id),
            serial: request.serial,
            vendor_id: request.vendor_id,
            originator_serial: request.originator_serial,
            ot_rpi: request.ot_rpi,
            to_rpi: request.to_rpi,
            ot_params: request.ot_params,
            to_params: request.to_params,
            transport: request.transport,
            path: request.path.clone(),
            max_reply: max_reply_size(request.to_params, large),
            large,
        };
        debug!(
            ot_id = %connection.ot_id,
            to_id = %connection.to_id,
            max_reply = connection.max_reply,
            large,
            "Connection opened"
        );

        if let Some(stale) = self.find(request.serial, request.vendor_id, request.originator_serial)
        {
            debug!(ot_id = %stale, "Replacing connection with the same triad");
            self.remove(stale);
        }
        while self.order.len() >= MAX_CONNECTIONS {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            warn!(ot_id = %oldest, "Connection table full, dropping oldest");
            self.connections.remove(&oldest);
        }
        self.connections.insert(ot_id, connection);
        self.order.push_back(ot_id);

        ForwardOpenReply {
            ot_connection_id: ot_id.0,
            to_connection_id: request.to_connection_id,
            serial: request.serial,
            vendor_id: request.vendor_id,
            originator_serial: request.originator_serial,
            ot_api: request.ot_rpi,
            to_api: request.to_rpi,
        }
    }

    /// Release the connection named by a Forward Close.
    ///
    /// The reply echoes the request's triad whether or not a connection
    /// matched.
    pub fn close(&mut self, request: &ForwardCloseRequest) -> ForwardCloseReply {
        match self.find(request.serial, request.vendor_id, request.originator_serial) {
            Some(id) => {
                self.remove(id);
                debug!(ot_id = %id, "Connection closed");
            }
            None => debug!(
                serial = request.serial,
                vendor_id = request.vendor_id,
                "Forward Close for unknown connection"
            ),
        }

        ForwardCloseReply {
            serial: request.serial,
            vendor_id: request.vendor_id,
            originator_serial: request.originator_serial,
        }
    }

    fn find(&self, serial: u16, vendor_id: u16, originator_serial: u32) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, c)| c.matches(serial, vendor_id, originator_serial))
            .map(|(id, _)| *id)
    }

    fn remove(&mut self, ot_id: ConnectionId) {
        self.connections.remove(&ot_id);
        self.order.retain(|id| *id != ot_id);
    }

    /// Look up a connection by its O→T ID.
    pub fn get(&self, ot_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&ot_id)
    }

    /// Connection for connected data addressed to `ot_id`.
    ///
    /// Falls back to the most recently opened connection when the ID is
    /// unknown; clients that reuse stale IDs are tolerated.
    pub fn resolve(&self, ot_id: ConnectionId) -> Option<&Connection> {
        if let Some(connection) = self.connections.get(&ot_id) {
            return Some(connection);
        }
        let fallback = self.order.back().and_then(|id| self.connections.get(id));
        if fallback.is_some() {
            warn!(ot_id = %ot_id, "Connected data for unknown connection ID");
        }
        fallback
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop all connections.
    pub fn clear(&mut self) {
        self.connections.clear();
        self.order.clear();
    }
}
