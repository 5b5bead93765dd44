//! Wire Codec
//!
//! Every message in both directions is one frame:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │ length: u32 (BE, 4B) │ body: JSON, `length` B   │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! Any read failure means the peer is gone.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest body accepted (1 MiB).
pub const MAX_FRAME_LEN: u32 = 1 << 20;

/// Socket-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer closed the connection between frames.
    #[error("connection closed")]
    Closed,

    /// Read/write failed, including short reads and resets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Length prefix exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(u32),

    /// Body could not be (de)serialized.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize `value` and write it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Block until one full frame arrives and deserialize it.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::Closed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::duplex;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        value: i32,
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &"ab").await.unwrap();
        // "ab" as JSON is 4 bytes including quotes.
        assert_eq!(&buf[..4], &[0, 0, 0, 4]);
        assert_eq!(&buf[4..], b"\"ab\"");
    }

    #[tokio::test]
    async fn test_frames_cross_a_pipe() {
        let (mut client, mut server) = duplex(64);
        let sent = Probe { name: "board".into(), value: -3 };

        let writer = tokio::spawn(async move {
            write_frame(&mut client, &sent).await.unwrap();
            write_frame(&mut client, &Probe { name: "next".into(), value: 9 }).await.unwrap();
        });

        let first: Probe = read_frame(&mut server).await.unwrap();
        let second: Probe = read_frame(&mut server).await.unwrap();
        writer.await.unwrap();

        assert_eq!(first.name, "board");
        assert_eq!(second.value, 9);
    }

    #[tokio::test]
    async fn test_clean_close_reports_closed() {
        let (client, mut server) = duplex(64);
        drop(client);
        let result: Result<Probe, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_short_body_is_io_error() {
        let mut bytes: &[u8] = &[0, 0, 0, 10, b'{'];
        let result: Result<Probe, _> = read_frame(&mut bytes).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = (MAX_FRAME_LEN + 1).to_be_bytes();
        let mut bytes: &[u8] = &header;
        let result: Result<Probe, _> = read_frame(&mut bytes).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let mut bytes: &[u8] = &[0, 0, 0, 3, b'n', b'o', b'!'];
        let result: Result<Probe, _> = read_frame(&mut bytes).await;
        assert!(matches!(result, Err(TransportError::Malformed(_))));
    }
}
