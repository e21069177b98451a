//! Async EtherNet/IP client for explicit messaging.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::debug;

use crate::cip::{MessageRouterRequest, MessageRouterResponse, logical_path};
use crate::codec::{Record, RegisterSessionData, ServiceInfo, get_u16};
use crate::connection::{ForwardCloseRequest, ForwardOpenReply, ForwardOpenRequest};
use crate::error::{EipError, Result};
use crate::header::{ConnectionId, SessionHandle};
use crate::message::{CommonPacket, CpfItem, EncapsulationMessage};
use crate::path;
use crate::session::check_status;
use crate::tag::TagKind;
use crate::transport::tcp::TcpConnection;
use crate::types::{
    CipStatus, Command, DataType, ItemType, STRUCT_TYPE_PREFIX, ServiceCode, class,
};

/// Point-to-point, 500 byte connection size.
const CONNECTION_PARAMS: u32 = 0x43F4;
/// Point-to-point, 4000 byte connection size.
const LARGE_CONNECTION_PARAMS: u32 = 0x4200_0FA0;

/// Value returned by a tag read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReply {
    pub kind: TagKind,
    /// Raw element bytes.
    pub data: Bytes,
    /// Set when the device truncated the reply.
    pub partial: bool,
}

/// Connection granted by Forward Open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConnection {
    pub ot_id: ConnectionId,
    pub to_id: ConnectionId,
    pub serial: u16,
    pub vendor_id: u16,
    pub originator_serial: u32,
}

/// An async EtherNet/IP client.
///
/// Requests go out unconnected (SendRRData) unless a connection is open,
/// in which case [`EipClient::send_unit`] carries them.
pub struct EipClient {
    connection: TcpConnection,
    session: SessionHandle,
    context: u64,
    io_timeout: Duration,
    cip: Option<ClientConnection>,
    sequence: u16,
}

impl EipClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    pub async fn connect_timeout<A: ToSocketAddrs>(addr: A, duration: Duration) -> Result<Self> {
        let stream = timeout(duration, TcpStream::connect(addr))
            .await
            .map_err(|_| EipError::Timeout)??;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        Ok(Self {
            connection: TcpConnection::new(stream)?,
            session: SessionHandle(0),
            context: 0,
            io_timeout: Duration::from_secs(10),
            cip: None,
            sequence: 0,
        })
    }

    /// Per-request reply timeout.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.io_timeout = duration;
        self
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn cip_connection(&self) -> Option<ClientConnection> {
        self.cip
    }

    /// Send a raw frame and wait for the reply with the same sender context.
    pub async fn call(&mut self, mut request: EncapsulationMessage) -> Result<EncapsulationMessage> {
        self.context = self.context.wrapping_add(1);
        request.header.sender_context = self.context;
        self.connection.write_message(&request).await?;

        loop {
            let reply = self.connection.read_message_timeout(self.io_timeout).await?;
            if reply.header.sender_context == self.context {
                return Ok(reply);
            }
            debug!(context = reply.header.sender_context, "Skipping stale reply");
        }
    }

    /// Send a frame that gets no reply.
    pub async fn send(&mut self, request: &EncapsulationMessage) -> Result<()> {
        self.connection.write_message(request).await
    }

    pub async fn register(&mut self) -> Result<SessionHandle> {
        let request = EncapsulationMessage::request(
            Command::RegisterSession,
            SessionHandle(0),
            RegisterSessionData::default().to_vec(),
        );
        let reply = self.call(request).await?;
        check_status(&reply)?;
        self.session = reply.header.session_handle;
        Ok(self.session)
    }

    /// Unregister and close the TCP connection.
    pub async fn unregister(mut self) -> Result<()> {
        let request =
            EncapsulationMessage::request(Command::UnregisterSession, self.session, Bytes::new());
        self.send(&request).await?;
        self.connection.shutdown().await?;
        Ok(())
    }

    /// Identity record of the device (the raw 0x0C item).
    pub async fn list_identity(&mut self) -> Result<Bytes> {
        let request = EncapsulationMessage::request(Command::ListIdentity, self.session, Bytes::new());
        let reply = self.call(request).await?;
        check_status(&reply)?;
        single_item(&reply, ItemType::ListIdentity)
    }

    pub async fn list_services(&mut self) -> Result<ServiceInfo> {
        let request = EncapsulationMessage::request(Command::ListServices, self.session, Bytes::new());
        let reply = self.call(request).await?;
        check_status(&reply)?;
        let mut item = single_item(&reply, ItemType::ListServices)?;
        ServiceInfo::decode(&mut item)
    }

    /// Send an unconnected request and decode the CIP reply.
    pub async fn send_rr(&mut self, request: &MessageRouterRequest) -> Result<MessageRouterResponse> {
        let packet = CommonPacket::unconnected(request.to_vec());
        let message = EncapsulationMessage::request(Command::SendRRData, self.session, packet.encode());
        let reply = self.call(message).await?;
        check_status(&reply)?;
        cip_reply(&reply, ItemType::UnconnectedData)
    }

    /// Send a request over the open connection.
    pub async fn send_unit(&mut self, request: &MessageRouterRequest) -> Result<MessageRouterResponse> {
        let Some(cip) = self.cip else {
            return Err(EipError::malformed("no open connection"));
        };
        self.sequence = self.sequence.wrapping_add(1);
        let packet = CommonPacket::connected(cip.ot_id, self.sequence, &request.to_vec());
        let message = EncapsulationMessage::request(Command::SendUnitData, self.session, packet.encode());
        let reply = self.call(message).await?;
        check_status(&reply)?;
        cip_reply(&reply, ItemType::ConnectedData)
    }

    async fn request(&mut self, request: &MessageRouterRequest) -> Result<MessageRouterResponse> {
        if self.cip.is_some() {
            self.send_unit(request).await
        } else {
            self.send_rr(request).await
        }
    }

    /// Open a connection; `large` selects Large Forward Open.
    pub async fn forward_open(&mut self, mut params: ForwardOpenRequest, large: bool) -> Result<ClientConnection> {
        if params.path.is_empty() {
            params.path = logical_path(class::MESSAGE_ROUTER, 1, None).into();
        }
        if params.to_params == 0 {
            params.to_params = if large { LARGE_CONNECTION_PARAMS } else { CONNECTION_PARAMS };
            params.ot_params = params.to_params;
        }
        let mut body = Vec::new();
        params.encode(&mut body, large);
        let service = if large {
            ServiceCode::LARGE_FORWARD_OPEN
        } else {
            ServiceCode::FORWARD_OPEN
        };
        let request = MessageRouterRequest::new(
            service,
            logical_path(class::CONNECTION_MANAGER, 1, None),
            body,
        );

        let reply = self.send_rr(&request).await?.into_result()?;
        let granted = ForwardOpenReply::decode(&mut reply.data.clone())?;
        let cip = ClientConnection {
            ot_id: ConnectionId(granted.ot_connection_id),
            to_id: ConnectionId(granted.to_connection_id),
            serial: granted.serial,
            vendor_id: granted.vendor_id,
            originator_serial: granted.originator_serial,
        };
        self.cip = Some(cip);
        Ok(cip)
    }

    /// Close the open connection, if any.
    pub async fn forward_close(&mut self) -> Result<()> {
        let Some(cip) = self.cip.take() else {
            return Ok(());
        };
        let close = ForwardCloseRequest {
            serial: cip.serial,
            vendor_id: cip.vendor_id,
            originator_serial: cip.originator_serial,
            path: logical_path(class::MESSAGE_ROUTER, 1, None).into(),
            ..Default::default()
        };
        let mut body = Vec::new();
        close.encode(&mut body);
        let request = MessageRouterRequest::new(
            ServiceCode::FORWARD_CLOSE,
            logical_path(class::CONNECTION_MANAGER, 1, None),
            body,
        );
        self.send_rr(&request).await?.into_result()?;
        Ok(())
    }

    /// Read `count` elements of a tag.
    pub async fn read_tag(&mut self, tag: &str, count: u16) -> Result<TagReply> {
        let request = MessageRouterRequest::new(
            ServiceCode::READ_TAG,
            path::encode(tag)?,
            count.to_le_bytes().to_vec(),
        );
        let reply = self.request(&request).await?.into_result()?;
        let partial = reply.status() == Some(CipStatus::PartialTransfer);
        let mut data = reply.data;
        let type_word = get_u16(&mut data, "read tag type")?;
        let kind = if type_word == STRUCT_TYPE_PREFIX {
            TagKind::Structure(get_u16(&mut data, "read tag structure handle")?)
        } else {
            DataType::from_u16(type_word)
                .map(TagKind::Atomic)
                .ok_or_else(|| EipError::malformed(format!("unknown type 0x{type_word:04X}")))?
        };
        Ok(TagReply {
            kind,
            data,
            partial,
        })
    }

    /// Write `count` elements of `kind` to a tag.
    pub async fn write_tag(&mut self, tag: &str, kind: TagKind, count: u16, data: &[u8]) -> Result<()> {
        let mut body = Vec::with_capacity(kind.type_len() + 2 + data.len());
        kind.encode_type(&mut body);
        body.put_u16_le(count);
        body.put_slice(data);
        let request = MessageRouterRequest::new(ServiceCode::WRITE_TAG, path::encode(tag)?, body);
        self.request(&request).await?.into_result()?;
        Ok(())
    }

    pub async fn get_attribute_single(&mut self, class_id: u32, instance: u32, attribute: u32) -> Result<Bytes> {
        let request = MessageRouterRequest::new(
            ServiceCode::GET_ATTRIBUTE_SINGLE,
            logical_path(class_id, instance, Some(attribute)),
            Bytes::new(),
        );
        Ok(self.request(&request).await?.into_result()?.data)
    }

    pub async fn get_attribute_all(&mut self, class_id: u32, instance: u32) -> Result<Bytes> {
        let request = MessageRouterRequest::new(
            ServiceCode::GET_ATTRIBUTE_ALL,
            logical_path(class_id, instance, None),
            Bytes::new(),
        );
        Ok(self.request(&request).await?.into_result()?.data)
    }

    /// Read a whole template definition, following partial transfers.
    pub async fn read_template(&mut self, handle: u16) -> Result<Bytes> {
        let mut definition = Vec::new();
        loop {
            let mut body = Vec::with_capacity(6);
            body.put_u32_le(definition.len() as u32);
            body.put_u16_le(u16::MAX);
            let request = MessageRouterRequest::new(
                ServiceCode::READ_TEMPLATE,
                logical_path(class::TEMPLATE, handle as u32, None),
                body,
            );
            let reply = self.request(&request).await?.into_result()?;
            let partial = reply.status() == Some(CipStatus::PartialTransfer);
            if reply.data.is_empty() {
                return Err(EipError::malformed("empty template fragment"));
            }
            definition.extend_from_slice(&reply.data);
            if !partial {
                return Ok(definition.into());
            }
        }
    }
}

impl std::fmt::Debug for EipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EipClient")
            .field("peer", &self.connection.peer_addr())
            .field("session", &self.session)
            .field("cip", &self.cip)
            .finish_non_exhaustive()
    }
}

fn single_item(reply: &EncapsulationMessage, kind: ItemType) -> Result<Bytes> {
    CommonPacket::decode_item_list(&reply.payload)?
        .into_iter()
        .find(|item| item.kind() == Some(kind))
        .map(|item| item.data)
        .ok_or_else(|| EipError::malformed(format!("reply without {kind:?} item")))
}

fn cip_reply(reply: &EncapsulationMessage, kind: ItemType) -> Result<MessageRouterResponse> {
    let packet = CommonPacket::decode(&reply.payload)?;
    let item: &CpfItem = packet
        .item(kind)
        .ok_or_else(|| EipError::malformed(format!("reply without {kind:?} item")))?;
    let mut data = item.data.clone();
    if kind == ItemType::ConnectedData {
        get_u16(&mut data, "sequence count")?;
    }
    MessageRouterResponse::decode(data.chunk())
}
