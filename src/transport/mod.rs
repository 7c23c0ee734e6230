//! Socket transport for CSI messages.
//!
//! The server listens on a Unix-domain socket (the CSI plugin registration
//! contract) and exchanges [`CsiMessage`](crate::message::CsiMessage) values
//! as JSON frames.  A byte stream has no message boundary of its own, so
//! every frame is prefixed with its length:
//!
//! ```text
//! [payload_len: u32 (big-endian)][JSON payload]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CsiError;
use crate::message::CsiMessage;

pub mod client;
pub mod server;

pub use client::CsiClient;
pub use server::CsiServer;

/// Upper bound for a single frame.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one length-prefixed frame.  A clean end-of-stream before the length
/// prefix yields `None`; a truncated frame is an error.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<CsiMessage>, CsiError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];

    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CsiError::transport(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CsiError::Transport(format!("frame of {len} bytes exceeds the limit")));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(CsiError::transport)?;

    let message = serde_json::from_slice(&payload)
        .map_err(|e| CsiError::Transport(format!("malformed frame: {e}")))?;
    Ok(Some(message))
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W>(writer: &mut W, message: &CsiMessage) -> Result<(), CsiError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message).map_err(CsiError::internal)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CsiError::Transport("frame too large".into()))?;

    writer.write_all(&len.to_be_bytes()).await.map_err(CsiError::transport)?;
    writer.write_all(&payload).await.map_err(CsiError::transport)?;
    writer.flush().await.map_err(CsiError::transport)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut writer = std::io::Cursor::new(Vec::new());
        write_frame(&mut writer, &CsiMessage::Probe).await.expect("write");

        let mut cursor = std::io::Cursor::new(writer.into_inner());
        let message = read_frame(&mut cursor).await.expect("read").expect("frame");
        assert!(matches!(message, CsiMessage::Probe));

        // The stream is now exhausted: a clean EOF.
        let end = read_frame(&mut cursor).await.expect("read");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mut writer = std::io::Cursor::new(Vec::new());
        write_frame(&mut writer, &CsiMessage::Probe).await.expect("write");

        let mut buf = writer.into_inner();
        buf.truncate(buf.len() - 1);

        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
