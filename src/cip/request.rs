//! Message router request and reply framing.

use bytes::{Buf, BufMut, Bytes};

use crate::codec::{get_u8, get_u16, take_bytes};
use crate::error::{EipError, Result};
use crate::types::{CipStatus, ServiceCode};

/// Explicit message request: service, padded path, request data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterRequest {
    pub service: ServiceCode,
    /// Raw path bytes, a whole number of words.
    pub path: Bytes,
    pub data: Bytes,
}

impl MessageRouterRequest {
    pub fn new(service: ServiceCode, path: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            service,
            path: path.into(),
            data: data.into(),
        }
    }

    /// Decode a request; everything after the path is request data.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(bytes);
        let service = ServiceCode(get_u8(&mut buf, "request service")?);
        let words = get_u8(&mut buf, "request path size")?;
        let path = take_bytes(&mut buf, words as usize * 2, "request path")?;
        Ok(Self {
            service,
            path,
            data: buf,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.service.0);
        buf.put_u8((self.path.len() / 2) as u8);
        buf.put_slice(&self.path);
        buf.put_slice(&self.data);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.path.len() + self.data.len());
        self.encode(&mut buf);
        buf
    }
}

/// Explicit message reply.
///
/// ```text
/// +-----------+----------+--------+-----------+-------------+------+
/// | service|80| reserved | status | ext words | ext status  | data |
/// +-----------+----------+--------+-----------+-------------+------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterResponse {
    /// Reply service code (request code with the reply bit set).
    pub service: u8,
    /// Raw general status; devices may answer codes this crate has no name for.
    pub general_status: u8,
    pub extended_status: Vec<u16>,
    pub data: Bytes,
}

impl MessageRouterResponse {
    /// Reply to `service` with the given status and no data.
    pub fn new(service: ServiceCode, status: CipStatus) -> Self {
        Self {
            service: service.reply(),
            general_status: status as u8,
            extended_status: Vec::new(),
            data: Bytes::new(),
        }
    }

    /// Successful reply carrying `data`.
    pub fn success(service: ServiceCode, data: impl Into<Bytes>) -> Self {
        Self::new(service, CipStatus::Success).with_data(data)
    }

    /// Path/tag failure: `PathSegmentError` with one zero extended status word.
    pub fn path_error(service: ServiceCode) -> Self {
        let mut reply = Self::new(service, CipStatus::PathSegmentError);
        reply.extended_status.push(0);
        reply
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_status(mut self, status: CipStatus) -> Self {
        self.general_status = status as u8;
        self
    }

    /// Decoded general status, if it is one this crate knows.
    pub fn status(&self) -> Option<CipStatus> {
        CipStatus::from_u8(self.general_status)
    }

    /// Check if the reply carries usable data.
    pub fn is_ok(&self) -> bool {
        self.status().is_some_and(|s| s.has_data())
    }

    /// Fail with [`EipError::Cip`] unless the status carries data.
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            return Ok(self);
        }
        Err(EipError::Cip {
            service: self.service & !ServiceCode::REPLY_FLAG,
            status: self.status().unwrap_or(CipStatus::ConnectionFailure),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(bytes);
        let service = get_u8(&mut buf, "reply service")?;
        get_u8(&mut buf, "reply reserved")?;
        let general_status = get_u8(&mut buf, "reply status")?;
        let words = get_u8(&mut buf, "reply extended status size")?;
        let extended_status = (0..words)
            .map(|_| get_u16(&mut buf, "reply extended status"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            service,
            general_status,
            extended_status,
            data: buf.copy_to_bytes(buf.remaining()),
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.service);
        buf.put_u8(0);
        buf.put_u8(self.general_status);
        buf.put_u8(self.extended_status.len() as u8);
        for word in &self.extended_status {
            buf.put_u16_le(*word);
        }
        buf.put_slice(&self.data);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 2 * self.extended_status.len() + self.data.len());
        self.encode(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codec() {
        let request = MessageRouterRequest::new(
            ServiceCode::READ_TAG,
            vec![0x91, 0x03, b'a', b'b', b'c', 0x00],
            vec![0x01, 0x00],
        );
        let bytes = request.to_vec();
        assert_eq!(bytes[..2], [0x4C, 0x03]);

        let decoded = MessageRouterRequest::decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_request_truncated_path() {
        assert!(MessageRouterRequest::decode(&[0x4C, 0x03, 0x91, 0x03]).is_err());
        assert!(MessageRouterRequest::decode(&[0x4C]).is_err());
    }

    #[test]
    fn test_path_error_reply() {
        let reply = MessageRouterResponse::path_error(ServiceCode::WRITE_TAG);
        assert_eq!(reply.to_vec(), vec![0xCD, 0x00, 0x04, 0x01, 0x00, 0x00]);
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_reply_codec() {
        let reply = MessageRouterResponse::success(ServiceCode::READ_TAG, vec![0xC4, 0x00, 1, 0, 0, 0]);
        let bytes = reply.to_vec();
        assert_eq!(bytes[..4], [0xCC, 0x00, 0x00, 0x00]);

        let decoded = MessageRouterResponse::decode(&bytes).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.status(), Some(CipStatus::Success));
    }

    #[test]
    fn test_into_result() {
        let partial = MessageRouterResponse::new(ServiceCode::READ_TAG, CipStatus::PartialTransfer);
        assert!(partial.into_result().is_ok());

        let err = MessageRouterResponse::new(ServiceCode::READ_TAG, CipStatus::PathUnknown)
            .into_result()
            .unwrap_err();
        assert!(matches!(
            err,
            EipError::Cip {
                service: 0x4C,
                status: CipStatus::PathUnknown
            }
        ));
    }
}
