//! Encapsulation command handling for one TCP connection or UDP datagram.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes};
use tracing::{debug, info, warn};

use crate::cip::{MessageRouterResponse, RequestContext, Router, identity_instance};
use crate::codec::{Record, RegisterSessionData, ServiceInfo, SocketAddress};
use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, SessionState, SessionStats};
use crate::error::{EipError, Result};
use crate::header::{ConnectionId, EncapsulationHeader, SessionHandle};
use crate::ids::IdGenerator;
use crate::message::{CommonPacket, CpfItem, EncapsulationMessage};
use crate::tag::TagStore;
use crate::types::{Command, ItemType, PROTOCOL_VERSION, encap_status};

/// State shared by every session of one server.
pub struct ServerContext {
    pub router: Router,
    pub config: ServerConfig,
    pub ids: Arc<dyn IdGenerator>,
    /// Address advertised in ListIdentity replies.
    pub advertised: SocketAddrV4,
}

impl ServerContext {
    /// Build the context for a server whose TCP listener is bound to `local`.
    pub fn new(
        config: ServerConfig,
        store: Arc<TagStore>,
        ids: Arc<dyn IdGenerator>,
        local: SocketAddr,
    ) -> Self {
        let ip = match (config.identity.advertised_address, local) {
            (Some(ip), _) => ip,
            (None, SocketAddr::V4(v4)) => *v4.ip(),
            (None, SocketAddr::V6(_)) => Ipv4Addr::UNSPECIFIED,
        };
        let advertised = SocketAddrV4::new(ip, local.port());
        let router = Router::new(store, config.identity.clone());
        Self {
            router,
            config,
            ids,
            advertised,
        }
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("config", &self.config)
            .field("advertised", &self.advertised)
            .finish_non_exhaustive()
    }
}

/// Transport a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// One encapsulation session.
///
/// A TCP connection owns one session for its lifetime; every UDP datagram
/// is handled by a fresh session that only answers the List* commands.
pub struct Session {
    ctx: Arc<ServerContext>,
    transport: Transport,
    state: SessionState,
    handle: Option<SessionHandle>,
    connections: ConnectionManager,
    stats: SessionStats,
    read_timeout: Duration,
}

impl Session {
    pub fn new(ctx: Arc<ServerContext>, transport: Transport) -> Self {
        let read_timeout = ctx.config.session_timeout;
        Self {
            ctx,
            transport,
            state: SessionState::Unregistered,
            handle: None,
            connections: ConnectionManager::new(),
            stats: SessionStats::default(),
            read_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Timeout for the next read; a SendRRData timeout overrides it once.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Mark the session closed, dropping its connections.
    pub fn close(&mut self) {
        if !self.state.is_closed() {
            self.connections.clear();
            self.state = SessionState::Closed;
            if let Some(handle) = self.handle {
                info!(
                    session = %handle,
                    requests = self.stats.requests,
                    uptime_ms = self.stats.uptime().as_millis() as u64,
                    "Session closed"
                );
            }
        }
    }

    /// Handle one request.
    ///
    /// Returns the reply, or `None` when the command is not answered.
    /// Errors are framing failures and end the session.
    pub fn handle_message(
        &mut self,
        request: &EncapsulationMessage,
    ) -> Result<Option<EncapsulationMessage>> {
        self.stats.record_request(request.total_size());
        self.read_timeout = self.ctx.config.session_timeout;

        let reply = self.dispatch(request)?;
        if let Some(reply) = &reply {
            self.stats.record_reply(reply.total_size(), reply.header.status);
        }
        Ok(reply)
    }

    fn dispatch(&mut self, request: &EncapsulationMessage) -> Result<Option<EncapsulationMessage>> {
        let command = match request.command() {
            Some(command) if self.transport == Transport::Tcp || command.allowed_on_udp() => {
                command
            }
            _ => {
                warn!(
                    command = request.header.command,
                    transport = ?self.transport,
                    "Unsupported encapsulation command"
                );
                return Ok(Some(
                    request.reply(encap_status::INVALID_COMMAND, request.payload.clone()),
                ));
            }
        };
        debug!(command = ?command, length = request.header.length, "Encapsulation request");

        match command {
            Command::Nop => Ok(None),
            Command::RegisterSession => self.register_session(request).map(Some),
            Command::UnregisterSession => {
                self.close();
                Ok(None)
            }
            Command::ListIdentity => Ok(Some(request.reply(encap_status::SUCCESS, self.list_identity()))),
            Command::ListServices => {
                let item = CpfItem::new(ItemType::ListServices, ServiceInfo::communications().to_vec());
                Ok(Some(request.reply(
                    encap_status::SUCCESS,
                    CommonPacket::encode_item_list(&[item]),
                )))
            }
            Command::ListInterfaces => Ok(Some(request.reply(
                encap_status::SUCCESS,
                CommonPacket::encode_item_list(&[]),
            ))),
            Command::SendRRData | Command::SendUnitData => self.send_data(request).map(Some),
        }
    }

    fn register_session(&mut self, request: &EncapsulationMessage) -> Result<EncapsulationMessage> {
        let mut data = RegisterSessionData::decode(&mut request.payload.clone())?;

        if data.protocol_version > PROTOCOL_VERSION {
            debug!(version = data.protocol_version, "Unsupported protocol version");
            data.protocol_version = PROTOCOL_VERSION;
            return Ok(request.reply(encap_status::UNSUPPORTED_PROTOCOL, data.to_vec()));
        }

        let handle = SessionHandle(self.ctx.ids.next_u32());
        self.handle = Some(handle);
        self.state = SessionState::Registered;
        info!(session = %handle, "Session registered");

        let mut header = EncapsulationHeader::reply_from(&request.header);
        header.session_handle = handle;
        Ok(EncapsulationMessage::new(header, data.to_vec()))
    }

    /// ListIdentity item list: one identity record.
    fn list_identity(&self) -> Vec<u8> {
        let mut record = Vec::new();
        record.put_u16_le(PROTOCOL_VERSION);
        SocketAddress::from_v4(self.ctx.advertised).encode(&mut record);
        record.extend_from_slice(&identity_instance(&self.ctx.config.identity).attributes_all());

        CommonPacket::encode_item_list(&[CpfItem::new(ItemType::ListIdentity, record)])
    }

    fn send_data(&mut self, request: &EncapsulationMessage) -> Result<EncapsulationMessage> {
        if !self.state.is_registered() {
            debug!(session = %request.header.session_handle, "Send data without a session");
            return Ok(request.reply(encap_status::INVALID_SESSION_HANDLE, Bytes::new()));
        }

        let packet = CommonPacket::decode(&request.payload)?;
        if packet.timeout != 0 && request.command() == Some(Command::SendRRData) {
            self.read_timeout = Duration::from_secs(packet.timeout as u64);
        }

        let [address, data] = packet.items.as_slice() else {
            debug!(items = packet.items.len(), "Item count is not 2");
            return Ok(request.reply(encap_status::INCORRECT_DATA, Bytes::new()));
        };

        let connected_id = match address.kind() {
            Some(ItemType::NullAddress) => None,
            Some(ItemType::ConnectedAddress) if address.data.len() == 4 => Some(ConnectionId(
                u32::from_le_bytes([address.data[0], address.data[1], address.data[2], address.data[3]]),
            )),
            _ => {
                debug!(item = address.item_type, "Unknown address item");
                return Ok(request.reply(encap_status::INCORRECT_DATA, Bytes::new()));
            }
        };

        let (sequence, body) = match data.kind() {
            Some(ItemType::UnconnectedData) => (None, data.data.clone()),
            Some(ItemType::ConnectedData) if data.data.len() >= 2 => (
                Some(u16::from_le_bytes([data.data[0], data.data[1]])),
                data.data.slice(2..),
            ),
            _ => {
                debug!(item = data.item_type, "Unknown data item");
                return Ok(request.reply(encap_status::INCORRECT_DATA, Bytes::new()));
            }
        };

        let connection = connected_id.and_then(|id| self.connections.resolve(id));
        let reply_to = connection.map(|c| c.to_id);
        let max_reply = match (sequence, connection) {
            (Some(_), Some(c)) => c.max_reply,
            _ => self.ctx.config.max_unconnected_reply,
        };

        let before = self.connections.len();
        let reply = self.route(&body, max_reply)?;
        self.track_connections(before);

        let mut packet = match (reply_to, sequence) {
            (Some(to_id), Some(sequence)) => CommonPacket::connected(to_id, sequence, &reply.to_vec()),
            _ => CommonPacket::unconnected(reply.to_vec()),
        };
        packet.interface_handle = 0;
        Ok(request.reply(encap_status::SUCCESS, packet.encode()))
    }

    fn route(&mut self, body: &[u8], max_reply: usize) -> Result<MessageRouterResponse> {
        let mut ctx = RequestContext {
            connections: &mut self.connections,
            ids: self.ctx.ids.as_ref(),
            max_reply,
        };
        self.ctx.router.handle(body, &mut ctx)
    }

    fn track_connections(&mut self, before: usize) {
        let after = self.connections.len();
        if after > before {
            self.stats.record_forward_open();
        } else if after < before {
            self.stats.record_forward_close();
        }
        if self.state.is_registered() {
            self.state = if after > 0 {
                SessionState::Connected
            } else {
                SessionState::Registered
            };
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

/// Fail with [`EipError::Encapsulation`] unless the reply status is 0.
pub(crate) fn check_status(reply: &EncapsulationMessage) -> Result<()> {
    if reply.is_ok() {
        Ok(())
    } else {
        Err(EipError::Encapsulation(reply.header.status))
    }
}
