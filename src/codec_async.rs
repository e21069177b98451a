//! Async encapsulation framing.
//!
//! TCP framing reads the fixed 24-byte header first, then exactly
//! `length` bytes of payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EipError, Result};
use crate::header::{EncapsulationHeader, HEADER_SIZE};
use crate::message::{EncapsulationMessage, MAX_PAYLOAD_SIZE};

/// Read a complete encapsulation frame from an async stream.
///
/// A clean end of stream before the first header byte is reported as
/// [`EipError::ConnectionClosed`].
pub async fn read_frame_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<EncapsulationMessage> {
    let mut header_buf = [0u8; HEADER_SIZE];
    let first = reader.read(&mut header_buf).await?;
    if first == 0 {
        return Err(EipError::ConnectionClosed);
    }
    if first < HEADER_SIZE {
        reader.read_exact(&mut header_buf[first..]).await?;
    }

    let header = EncapsulationHeader::from_bytes(&header_buf)?;
    let payload_len = header.length as usize;

    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await?;
    }

    Ok(EncapsulationMessage { header, payload: payload.into() })
}

/// Write a complete encapsulation frame to an async stream.
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &EncapsulationMessage,
) -> Result<()> {
    if message.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(EipError::malformed(format!(
            "payload of {} bytes exceeds frame limit",
            message.payload.len()
        )));
    }
    writer.write_all(&message.to_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SessionHandle;
    use crate::types::Command;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_async_read_write_frame() {
        let original = EncapsulationMessage::request(
            Command::RegisterSession,
            SessionHandle(0),
            vec![1u8, 0, 0, 0],
        );

        let mut buffer = Vec::new();
        write_frame_async(&mut buffer, &original).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let parsed = read_frame_async(&mut cursor).await.unwrap();

        assert_eq!(original, parsed);
    }

    #[tokio::test]
    async fn test_async_read_empty_payload() {
        let original =
            EncapsulationMessage::request(Command::ListIdentity, SessionHandle(0), Vec::new());

        let mut buffer = Vec::new();
        write_frame_async(&mut buffer, &original).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let parsed = read_frame_async(&mut cursor).await.unwrap();
        assert!(parsed.payload.is_empty());
    }

    #[tokio::test]
    async fn test_async_read_eof() {
        let mut cursor = Cursor::new(Vec::new());
        let result = read_frame_async(&mut cursor).await;
        assert!(matches!(result, Err(EipError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_async_read_truncated_payload() {
        let msg = EncapsulationMessage::request(Command::SendRRData, SessionHandle(1), vec![0u8; 16]);
        let mut bytes = msg.to_bytes();
        bytes.truncate(30);

        let mut cursor = Cursor::new(bytes);
        let result = read_frame_async(&mut cursor).await;
        assert!(matches!(result, Err(EipError::Io(_))));
    }
}
