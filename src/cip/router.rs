//! CIP message router: dispatches explicit requests to their services.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes};
use tracing::debug;

use crate::codec::{Record, get_u8, get_u16, get_u32, take_bytes};
use crate::config::IdentityConfig;
use crate::connection::{ConnectionManager, ForwardCloseRequest, ForwardOpenRequest};
use crate::error::{EipError, Result};
use crate::ids::IdGenerator;
use crate::path::PathElement;
use crate::tag::{TagKind, TagStore};
use crate::types::{CipStatus, DataType, STRUCT_TYPE_PREFIX, ServiceCode, class};

use super::epath::{RequestPath, Segment};
use super::object::{self, symbol_instance};
use super::request::{MessageRouterRequest, MessageRouterResponse};

/// Symbol browsing stops once the reply is within this many bytes of the limit.
const BROWSE_MARGIN: usize = 20;

/// Per-request state owned by the session.
pub struct RequestContext<'a> {
    /// Connections of the session; Forward Open/Close update it.
    pub connections: &'a mut ConnectionManager,
    /// Source of O→T connection IDs.
    pub ids: &'a dyn IdGenerator,
    /// Largest reply payload for this request.
    pub max_reply: usize,
}

/// Routes explicit messages to the identity, connection manager, symbol
/// and template objects and to the tag services.
#[derive(Debug, Clone)]
pub struct Router {
    store: Arc<TagStore>,
    identity: IdentityConfig,
}

impl Router {
    pub fn new(store: Arc<TagStore>, identity: IdentityConfig) -> Self {
        Self { store, identity }
    }

    pub fn store(&self) -> &Arc<TagStore> {
        &self.store
    }

    /// Handle one encoded request.
    ///
    /// Errors are framing failures in the request body and end the session;
    /// every other failure is reported in the reply status.
    pub fn handle(&self, bytes: &[u8], ctx: &mut RequestContext<'_>) -> Result<MessageRouterResponse> {
        let request = MessageRouterRequest::decode(bytes)?;
        self.dispatch(&request, ctx)
    }

    /// Dispatch a decoded request.
    pub fn dispatch(
        &self,
        request: &MessageRouterRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<MessageRouterResponse> {
        let service = request.service;
        let path = match RequestPath::decode(&request.path) {
            Ok(path) => path,
            Err(e) => {
                debug!(service = %service, error = %e, "Bad request path");
                return Ok(MessageRouterResponse::path_error(service));
            }
        };
        debug!(
            service = %service,
            class = ?path.class,
            instance = ?path.instance,
            attribute = ?path.attribute,
            "CIP request"
        );

        let mut data = request.data.clone();
        let class_id = path.class;
        let tag_class = class_id.is_none() || class_id == Some(class::SYMBOL);

        match service {
            ServiceCode::UNCONNECTED_SEND if class_id == Some(class::CONNECTION_MANAGER) => {
                self.unconnected_send(&mut data, ctx)
            }
            ServiceCode::MULTIPLE_SERVICE_PACKET if class_id == Some(class::MESSAGE_ROUTER) => {
                self.multiple_service_packet(request, ctx)
            }
            ServiceCode::GET_ATTRIBUTE_ALL => Ok(self.get_attribute_all(service, &path)),
            ServiceCode::GET_ATTRIBUTE_LIST => self.get_attribute_list(service, &path, &mut data),
            ServiceCode::GET_ATTRIBUTE_SINGLE => Ok(self.get_attribute_single(service, &path)),
            ServiceCode::GET_INSTANCE_ATTRIBUTE_LIST if class_id == Some(class::SYMBOL) => {
                self.get_instance_attribute_list(service, &path, &mut data, ctx.max_reply)
            }
            ServiceCode::FORWARD_OPEN | ServiceCode::LARGE_FORWARD_OPEN
                if class_id == Some(class::CONNECTION_MANAGER) =>
            {
                let large = service == ServiceCode::LARGE_FORWARD_OPEN;
                let open = ForwardOpenRequest::decode(&mut data, large)?;
                let reply = ctx.connections.open(&open, large, ctx.ids);
                Ok(MessageRouterResponse::success(service, reply.to_vec()))
            }
            ServiceCode::FORWARD_CLOSE if class_id == Some(class::CONNECTION_MANAGER) => {
                let close = ForwardCloseRequest::decode(&mut data)?;
                let reply = ctx.connections.close(&close);
                Ok(MessageRouterResponse::success(service, reply.to_vec()))
            }
            ServiceCode::READ_TEMPLATE if class_id == Some(class::TEMPLATE) => {
                self.read_template(service, &path, &mut data, ctx.max_reply)
            }
            ServiceCode::READ_TAG if tag_class => {
                let count = get_u16(&mut data, "read tag count")?;
                Ok(self.read_tag(service, &path, count, None, ctx.max_reply))
            }
            ServiceCode::READ_TAG_FRAGMENTED if tag_class => {
                let count = get_u16(&mut data, "read tag count")?;
                let offset = get_u32(&mut data, "read tag offset")?;
                Ok(self.read_tag(service, &path, count, Some(offset), ctx.max_reply))
            }
            ServiceCode::WRITE_TAG | ServiceCode::WRITE_TAG_FRAGMENTED if tag_class => {
                self.write_tag(service, &path, &mut data)
            }
            ServiceCode::READ_MODIFY_WRITE if tag_class => {
                let size = get_u16(&mut data, "mask size")? as usize;
                let or_mask = take_bytes(&mut data, size, "or mask")?;
                let and_mask = take_bytes(&mut data, size, "and mask")?;
                let result = self
                    .tag_path(&path)
                    .and_then(|p| self.store.read_modify_write(&p, &or_mask, &and_mask));
                Ok(tag_reply(service, result.map(|_| Bytes::new())))
            }
            ServiceCode::RESET => {
                let status = match data.first() {
                    Some(kind) if *kind > 1 => CipStatus::InvalidParameter,
                    _ => CipStatus::Success,
                };
                debug!(status = ?status, "Reset");
                self.store.notify(ServiceCode::RESET, status, None);
                Ok(MessageRouterResponse::new(service, status))
            }
            _ => {
                debug!(service = %service, class = ?class_id, "Service not supported");
                Ok(MessageRouterResponse::new(
                    service,
                    CipStatus::ServiceNotSupported,
                ))
            }
        }
    }

    /// Unwrap an Unconnected Send and dispatch the embedded request.
    /// The route path is ignored.
    fn unconnected_send(
        &self,
        data: &mut Bytes,
        ctx: &mut RequestContext<'_>,
    ) -> Result<MessageRouterResponse> {
        get_u8(data, "unconnected send priority")?;
        get_u8(data, "unconnected send timeout")?;
        let size = get_u16(data, "unconnected send size")? as usize;
        let embedded = take_bytes(data, size, "unconnected send request")?;
        let embedded = MessageRouterRequest::decode(&embedded)?;
        debug!(service = %embedded.service, "Unconnected send");
        self.dispatch(&embedded, ctx)
    }

    fn multiple_service_packet(
        &self,
        request: &MessageRouterRequest,
        ctx: &mut RequestContext<'_>,
    ) -> Result<MessageRouterResponse> {
        let body = &request.data;
        let mut buf = body.clone();
        let count = get_u16(&mut buf, "service count")? as usize;
        let offsets = (0..count)
            .map(|_| get_u16(&mut buf, "service offset").map(usize::from))
            .collect::<Result<Vec<_>>>()?;

        let mut replies = Vec::new();
        let mut reply_offsets = Vec::with_capacity(count);
        let mut failed = false;
        for (i, start) in offsets.iter().enumerate() {
            let end = offsets.get(i + 1).copied().unwrap_or(body.len());
            let embedded = body
                .get(*start..end)
                .ok_or_else(|| EipError::malformed("multiple service packet offsets"))?;
            let reply = self.handle(embedded, ctx)?;
            failed |= !reply.is_ok();
            reply_offsets.push((2 + 2 * count + replies.len()) as u16);
            reply.encode(&mut replies);
        }

        let mut out = Vec::with_capacity(2 + 2 * count + replies.len());
        out.put_u16_le(count as u16);
        for offset in reply_offsets {
            out.put_u16_le(offset);
        }
        out.extend_from_slice(&replies);

        let status = if failed {
            CipStatus::EmbeddedServiceError
        } else {
            CipStatus::Success
        };
        Ok(MessageRouterResponse::new(request.service, status).with_data(out))
    }

    fn instance(&self, path: &RequestPath) -> Option<object::ObjectInstance> {
        let class_id = path.class?;
        object::lookup(&self.store, &self.identity, class_id, path.instance.unwrap_or(0))
    }

    fn get_attribute_all(&self, service: ServiceCode, path: &RequestPath) -> MessageRouterResponse {
        match self.instance(path) {
            Some(instance) => MessageRouterResponse::success(service, instance.attributes_all()),
            None => MessageRouterResponse::new(service, CipStatus::PathUnknown),
        }
    }

    fn get_attribute_single(
        &self,
        service: ServiceCode,
        path: &RequestPath,
    ) -> MessageRouterResponse {
        let Some(instance) = self.instance(path) else {
            return MessageRouterResponse::new(service, CipStatus::PathUnknown);
        };
        let attribute = path.attribute.and_then(|a| u16::try_from(a).ok());
        match attribute.and_then(|a| instance.attribute(a)) {
            Some(data) => MessageRouterResponse::success(service, data.to_vec()),
            None => MessageRouterResponse::new(service, CipStatus::AttributeNotSupported),
        }
    }

    fn get_attribute_list(
        &self,
        service: ServiceCode,
        path: &RequestPath,
        data: &mut Bytes,
    ) -> Result<MessageRouterResponse> {
        let count = get_u16(data, "attribute count")?;
        let ids = (0..count)
            .map(|_| get_u16(data, "attribute id"))
            .collect::<Result<Vec<_>>>()?;

        let Some(instance) = self.instance(path) else {
            return Ok(MessageRouterResponse::new(service, CipStatus::PathUnknown));
        };

        let mut status = CipStatus::Success;
        let mut out = Vec::new();
        out.put_u16_le(count);
        for id in ids {
            out.put_u16_le(id);
            match instance.attribute(id) {
                Some(value) => {
                    out.put_u16_le(CipStatus::Success as u16);
                    out.put_slice(value);
                }
                None => {
                    status = CipStatus::AttributeListError;
                    out.put_u16_le(CipStatus::AttributeNotSupported as u16);
                }
            }
        }
        Ok(MessageRouterResponse::new(service, status).with_data(out))
    }

    /// Tag browsing over the symbol class.
    fn get_instance_attribute_list(
        &self,
        service: ServiceCode,
        path: &RequestPath,
        data: &mut Bytes,
        max_reply: usize,
    ) -> Result<MessageRouterResponse> {
        let count = get_u16(data, "attribute count")?;
        let ids = (0..count)
            .map(|_| get_u16(data, "attribute id"))
            .collect::<Result<Vec<_>>>()?;

        let mut status = CipStatus::Success;
        let mut out = Vec::new();
        for symbol in self.store.symbols_from(path.instance.unwrap_or(0)) {
            if out.len() >= max_reply.saturating_sub(BROWSE_MARGIN) {
                status = CipStatus::PartialTransfer;
                break;
            }
            out.put_u32_le(symbol.instance);
            let instance = symbol_instance(&symbol);
            for id in &ids {
                match instance.attribute(*id) {
                    Some(value) => out.put_slice(value),
                    None => status = CipStatus::AttributeListError,
                }
            }
        }
        Ok(MessageRouterResponse::new(service, status).with_data(out))
    }

    fn read_template(
        &self,
        service: ServiceCode,
        path: &RequestPath,
        data: &mut Bytes,
        max_reply: usize,
    ) -> Result<MessageRouterResponse> {
        let offset = get_u32(data, "template offset")? as usize;
        // requested byte count; the reply is bounded by the reply size instead
        get_u16(data, "template size")?;

        let st = path
            .instance
            .and_then(|i| u16::try_from(i).ok())
            .and_then(|h| self.store.structure_by_handle(h));
        let Some(st) = st.filter(|st| offset < st.definition().len()) else {
            return Ok(MessageRouterResponse::new(service, CipStatus::PathUnknown));
        };

        let mut bytes = st.definition()[offset..].to_vec();
        let mut status = CipStatus::Success;
        if bytes.len() > max_reply {
            bytes.truncate(max_reply);
            status = CipStatus::PartialTransfer;
        }
        Ok(MessageRouterResponse::new(service, status).with_data(bytes))
    }

    fn read_tag(
        &self,
        service: ServiceCode,
        path: &RequestPath,
        count: u16,
        offset: Option<u32>,
        max_reply: usize,
    ) -> MessageRouterResponse {
        let result = self
            .tag_path(path)
            .and_then(|p| self.store.read_for(service, &p, count as usize));
        let tag = match result {
            Ok(tag) => tag,
            Err(e) => {
                debug!(service = %service, error = %e, "Tag read failed");
                return MessageRouterResponse::path_error(service);
            }
        };

        let mut bytes = tag.data;
        if let Some(offset) = offset {
            let offset = offset as usize;
            if offset >= bytes.len() {
                debug!(service = %service, offset, "Fragment offset past end of data");
                return MessageRouterResponse::path_error(service);
            }
            bytes.drain(..offset);
        }

        let status = if truncate(&mut bytes, tag.element_len, max_reply) {
            CipStatus::PartialTransfer
        } else {
            CipStatus::Success
        };

        let mut out = Vec::with_capacity(tag.kind.type_len() + bytes.len());
        tag.kind.encode_type(&mut out);
        out.extend_from_slice(&bytes);
        MessageRouterResponse::new(service, status).with_data(out)
    }

    fn write_tag(
        &self,
        service: ServiceCode,
        path: &RequestPath,
        data: &mut Bytes,
    ) -> Result<MessageRouterResponse> {
        let type_word = get_u16(data, "write tag type")?;
        let kind = if type_word == STRUCT_TYPE_PREFIX {
            Some(TagKind::Structure(get_u16(data, "write tag structure handle")?))
        } else {
            DataType::from_u16(type_word).map(TagKind::Atomic)
        };
        let count = get_u16(data, "write tag count")? as usize;
        let offset = if service == ServiceCode::WRITE_TAG_FRAGMENTED {
            Some(get_u32(data, "write tag offset")? as usize)
        } else {
            None
        };
        let payload = data.copy_to_bytes(data.remaining());

        let Some(kind) = kind else {
            debug!(type_word, "Write with unknown type");
            return Ok(MessageRouterResponse::path_error(service));
        };

        let result = self.tag_path(path).and_then(|p| match offset {
            Some(offset) => self.store.write_fragment(&p, kind, count, offset, &payload),
            None => self.store.write(&p, kind, count, &payload),
        });
        if let Err(e) = &result {
            debug!(service = %service, error = %e, "Tag write failed");
        }
        Ok(tag_reply(service, result.map(|_| Bytes::new())))
    }

    /// Tag path of a request: symbolic, by symbol instance, or program
    /// scoped by symbol instance.
    fn tag_path(&self, path: &RequestPath) -> Result<Vec<PathElement>> {
        let by_instance = |instance: u32, rest: usize| -> Result<Vec<PathElement>> {
            let symbol = self
                .store
                .symbol(instance)
                .ok_or_else(|| EipError::UnknownTag(format!("symbol instance {instance}")))?;
            let mut elements = vec![PathElement::Symbol(symbol.name)];
            elements.extend(path.tag_elements(rest));
            Ok(elements)
        };

        match path.segments.as_slice() {
            [Segment::Symbol(program), Segment::Class(c), Segment::Instance(i), ..]
                if program.starts_with("Program:") && *c == class::SYMBOL =>
            {
                by_instance(*i, 3)
            }
            [Segment::Symbol(_), ..] => Ok(path.tag_elements(0)),
            [Segment::Class(c), Segment::Instance(i), ..] if *c == class::SYMBOL => {
                by_instance(*i, 2)
            }
            _ => Err(EipError::path_syntax("no tag in request path")),
        }
    }
}

/// Success, or the generic tag failure reply.
fn tag_reply(service: ServiceCode, result: Result<Bytes>) -> MessageRouterResponse {
    match result {
        Ok(data) => MessageRouterResponse::success(service, data),
        Err(e) => {
            debug!(service = %service, error = %e, "Tag service failed");
            MessageRouterResponse::path_error(service)
        }
    }
}

/// Trim a reply to whole elements within `max`; returns whether it was cut.
fn truncate(bytes: &mut Vec<u8>, element_len: usize, max: usize) -> bool {
    if bytes.len() <= max {
        return false;
    }
    let keep = if element_len == 0 || element_len > max {
        max
    } else {
        (max / element_len) * element_len
    };
    bytes.truncate(keep);
    true
}
