//! Varint length-delimited framing for [`ProxyMessage`]s

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::message::ProxyMessage;
use super::MAX_MESSAGE_SIZE;
use crate::error::{TunnelError, TunnelResult};

/// Longest encoding of a u64 varint
const MAX_VARINT_LEN: usize = 10;

/// Write one framed message and flush it.
pub async fn write_message<W>(writer: &mut W, message: &ProxyMessage) -> TunnelResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = message.encoded_len();
    if len > MAX_MESSAGE_SIZE {
        return Err(TunnelError::protocol(format!(
            "message of {} bytes exceeds the {} byte limit",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(prost::length_delimiter_len(len) + len);
    message.encode_length_delimited(&mut frame)?;

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// The length prefix is checked against [`MAX_MESSAGE_SIZE`] before any
/// buffer is allocated.
pub async fn read_message<R>(reader: &mut R) -> TunnelResult<ProxyMessage>
where
    R: AsyncRead + Unpin,
{
    let len = read_length(reader).await?;
    if len > MAX_MESSAGE_SIZE {
        return Err(TunnelError::protocol(format!(
            "peer announced a {} byte message, limit is {}",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let message = ProxyMessage::decode(payload.as_slice())?;

    debug!("Read {} byte proxy message", len);
    Ok(message)
}

async fn read_length<R>(reader: &mut R) -> TunnelResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = reader.read_u8().await?;
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return usize::try_from(value)
                .map_err(|_| TunnelError::protocol("length prefix overflows usize"));
        }
    }
    Err(TunnelError::protocol("length prefix is not a valid varint"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[tokio::test]
    async fn test_frames_back_to_back() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_message(&mut a, &ProxyMessage::connect("edge-b", "10.0.0.5", 80))
            .await
            .unwrap();
        write_message(&mut a, &ProxyMessage::response(MessageType::Failed))
            .await
            .unwrap();

        let first = read_message(&mut b).await.unwrap();
        assert_eq!(first.ip.as_deref(), Some("10.0.0.5"));
        let second = read_message(&mut b).await.unwrap();
        assert_eq!(second.message_type().unwrap(), MessageType::Failed);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected_before_reading_payload() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut prefix = Vec::new();
        prost::encode_length_delimiter(MAX_MESSAGE_SIZE + 1, &mut prefix).unwrap();
        a.write_all(&prefix).await.unwrap();

        // Only the prefix was sent, so reading the payload would block forever
        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, TunnelError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_oversized_message_is_not_written() {
        let (mut a, _b) = tokio::io::duplex(64);
        let huge = ProxyMessage::connect(&"x".repeat(MAX_MESSAGE_SIZE), "10.0.0.5", 80);
        assert!(write_message(&mut a, &huge).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0x05, 0x08]).await.unwrap();
        drop(a);
        assert!(matches!(read_message(&mut b).await, Err(TunnelError::Io(_))));
    }

    #[tokio::test]
    async fn test_overlong_varint_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0xff; MAX_VARINT_LEN]).await.unwrap();
        assert!(matches!(
            read_message(&mut b).await,
            Err(TunnelError::Protocol { .. })
        ));
    }
}
