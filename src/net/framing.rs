//! Length-prefixed framing for the ordered channel
//!
//! Format: [4 bytes little-endian length][bincode payload]

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::MAX_MESSAGE_SIZE;
use crate::net::protocol::{self, ClientEnvelope, DecodeError, EncodeError, ServerEnvelope};

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

fn eof_as_closed(e: io::Error) -> FramingError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FramingError::ConnectionClosed
    } else {
        FramingError::Io(e)
    }
}

/// Read one frame's payload
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }

    let mut buf = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut buf).await.map_err(eof_as_closed)?;
    }
    Ok(buf)
}

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), FramingError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(payload.len(), MAX_MESSAGE_SIZE));
    }
    stream.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read and decode the next client command
pub async fn read_command<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<ClientEnvelope, FramingError> {
    let payload = read_frame(stream).await?;
    Ok(protocol::decode(&payload)?)
}

/// Encode a server envelope into a frame payload, checking the size limit
pub fn encode_envelope(envelope: &ServerEnvelope) -> Result<Vec<u8>, FramingError> {
    let payload = protocol::encode(envelope)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(payload.len(), MAX_MESSAGE_SIZE));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{ClientCommand, ServerEvent};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"arena").await.unwrap();
        write_frame(&mut buffer, b"").await.unwrap();

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), b"arena");
        assert!(read_frame(&mut cursor).await.unwrap().is_empty());
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(FramingError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&((MAX_MESSAGE_SIZE as u32) + 1).to_le_bytes());
        let mut cursor = Cursor::new(buffer);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(FramingError::MessageTooLarge(_, _))
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_closed() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&10u32.to_le_bytes());
        buffer.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(buffer);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(FramingError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_command() {
        let envelope = ClientEnvelope {
            auth_tag: Vec::new(),
            command: ClientCommand::Ping,
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &protocol::encode(&envelope).unwrap())
            .await
            .unwrap();
        let mut cursor = Cursor::new(buffer);
        let decoded = read_command(&mut cursor).await.unwrap();
        assert!(matches!(decoded.command, ClientCommand::Ping));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_decode_error() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &[0xEE; 3]).await.unwrap();
        let mut cursor = Cursor::new(buffer);
        assert!(matches!(
            read_command(&mut cursor).await,
            Err(FramingError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&5u32.to_le_bytes()[..2])
            .read(&5u32.to_le_bytes()[2..])
            .read(b"ar")
            .read(b"ena")
            .build();
        assert_eq!(read_frame(&mut stream).await.unwrap(), b"arena");
    }

    #[tokio::test]
    async fn test_write_frame_prefixes_length() {
        let mut stream = tokio_test::io::Builder::new()
            .write(&3u32.to_le_bytes())
            .write(b"abc")
            .build();
        write_frame(&mut stream, b"abc").await.unwrap();
    }

    #[test]
    fn test_encode_envelope() {
        let payload = encode_envelope(&ServerEnvelope::unsequenced(ServerEvent::Ping)).unwrap();
        assert!(!payload.is_empty());
    }
}
