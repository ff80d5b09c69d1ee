//! Length-prefixed message framing on a bidirectional byte stream.
//!
//! A frame is `uint32_be length || body`, where `body`'s first byte is the
//! message-type id and the rest is the per-message payload. Frames above the
//! configured maximum close the connection with [`FrameError::TooLarge`].

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::U32_LEN;

/// Default bound on frame body size.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the configured maximum of {max} bytes")]
    TooLarge { len: u32, max: u32 },
    #[error("frame body is empty; a message must carry at least a type byte")]
    Empty,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads one frame body from `r`, or `Ok(None)` if the peer closed the
/// connection cleanly before sending anything (distinguished from a mid-frame
/// disconnect, which is an [`FrameError::Io`]).
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    max_frame_bytes: u32,
) -> Result<Option<Vec<u8>>, FrameError> {
    let mut len_buf = [0u8; U32_LEN];
    let read = read_or_eof(r, &mut len_buf).await?;
    if read == 0 {
        return Ok(None);
    }
    if read < len_buf.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid length-prefix",
        )
        .into());
    }

    let len = u32::from_be_bytes(len_buf);
    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }
    if len == 0 {
        return Err(FrameError::Empty);
    }

    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes one frame body to `w`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    body: &[u8],
) -> Result<(), FrameError> {
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        len: u32::MAX,
        max: u32::MAX,
    })?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(body).await?;
    w.flush().await?;
    Ok(())
}

/// Fills `buf` or returns the number of bytes read before a clean EOF.
/// Unlike `read_exact`, this lets the caller tell "peer hung up between
/// messages" apart from "peer hung up mid-message".
async fn read_or_eof<R: AsyncRead + Unpin>(
    r: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = r.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn frame_round_trips() {
        let body = b"\x01hello world".to_vec();
        let mut len_prefixed = Vec::new();
        len_prefixed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        len_prefixed.extend_from_slice(&body);

        let mut mock = Builder::new().read(&len_prefixed).build();
        let got = read_frame(&mut mock, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert_eq!(got, Some(body));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let body = b"\x09".to_vec();
        let mut buf = Vec::new();
        write_frame(&mut buf, &body).await.unwrap();

        let mut mock = Builder::new().read(&buf).build();
        let got = read_frame(&mut mock, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert_eq!(got, Some(body));
    }

    #[tokio::test]
    async fn clean_eof_before_any_bytes_is_none() {
        let mut mock = Builder::new().build();
        let got = read_frame(&mut mock, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut mock = Builder::new().read(&100u32.to_be_bytes()).build();
        let err = read_frame(&mut mock, 10).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len: 100, max: 10 }));
    }

    #[tokio::test]
    async fn empty_frame_is_rejected() {
        let mut mock = Builder::new().read(&0u32.to_be_bytes()).build();
        let err = read_frame(&mut mock, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Empty));
    }

    #[tokio::test]
    async fn truncated_mid_frame_is_io_error() {
        let mut mock = Builder::new()
            .read(&10u32.to_be_bytes())
            .read(b"short")
            .build();
        let err = read_frame(&mut mock, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }
}
