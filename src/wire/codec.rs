//! Length-framed postcard codec.
//!
//! Every message on the wire is a 4-byte little-endian length prefix
//! followed by that many bytes of postcard-encoded payload. Frames above
//! [`MAX_FRAME_LEN`] are rejected on both sides before any allocation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Link batches are small; anything near
/// this size indicates a corrupt or hostile peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Transport and encoding failures on the RPC wire.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error on transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Encode(postcard::Error),

    #[error("failed to decode message: {0}")]
    Decode(postcard::Error),
}

impl WireError {
    /// Whether the peer simply went away, as opposed to a protocol fault.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            WireError::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
            )
        )
    }
}

/// Read one frame and decode it.
pub async fn read_frame<T, R>(input: &mut R) -> Result<T, WireError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    input.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf).await?;

    postcard::from_bytes(&buf).map_err(WireError::Decode)
}

/// Encode one message and write it as a frame, flushing the transport.
pub async fn write_frame<T, W>(output: &mut W, msg: &T) -> Result<(), WireError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let buf = postcard::to_allocvec(msg).map_err(WireError::Encode)?;

    if buf.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(buf.len()));
    }

    output.write_all(&(buf.len() as u32).to_le_bytes()).await?;
    output.write_all(&buf).await?;
    output.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::types::{Request, Response, RetStatus, UserIdentity};

    #[tokio::test]
    async fn request_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let req = Request::ResignUserIdentity {
            identity: UserIdentity::new("alice", "s3cret"),
            name: "worker-0".to_string(),
        };
        write_frame(&mut client, &req).await.unwrap();

        let decoded: Request = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded, req);

        let resp = Response::Status(RetStatus::Success);
        write_frame(&mut server, &resp).await.unwrap();
        let decoded: Response = read_frame(&mut client).await.unwrap();
        assert_eq!(decoded, resp);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Hand-write a frame header claiming more than the limit.
        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &len)
            .await
            .unwrap();

        let err = read_frame::<Request, _>(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn truncated_frame_reports_disconnect() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &8u32.to_le_bytes())
            .await
            .unwrap();
        drop(client);

        let err = read_frame::<Request, _>(&mut server).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
