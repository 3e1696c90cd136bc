//! # Framing
//!
//! `[length:u32 LE][payload: length bytes]` over a byte stream. The length is
//! checked against the configured maximum before any payload allocation.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, CodecResult, TransportError, TransportResult};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Prepends the length prefix to `payload`.
///
/// # Errors
///
/// [`CodecError::FrameTooLarge`] if `payload` exceeds `max_len` (or `u32`).
pub fn encode_frame(payload: &[u8], max_len: usize) -> CodecResult<Vec<u8>> {
    let len = checked_len(payload.len(), max_len)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn checked_len(len: usize, max_len: usize) -> CodecResult<u32> {
    if len > max_len {
        return Err(CodecError::FrameTooLarge { len, max: max_len });
    }
    u32::try_from(len).map_err(|_| CodecError::FrameTooLarge {
        len,
        max: u32::MAX as usize,
    })
}

/// Writes one frame.
///
/// # Errors
///
/// [`TransportError::Codec`] for an oversized payload (nothing is written),
/// [`TransportError::Io`] on socket failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_len: usize) -> TransportResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(payload, max_len)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closes the stream cleanly between
/// frames. A close inside the length prefix is not clean.
///
/// # Errors
///
/// [`CodecError::FrameTooLarge`] if the prefix exceeds `max_len`,
/// [`TransportError::ConnectionClosed`] if the stream ends mid-frame
/// (prefix included),
/// [`TransportError::Io`] otherwise.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> TransportResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        match reader.read(&mut header[filled..]).await {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(TransportError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(CodecError::FrameTooLarge { len, max: max_len }.into());
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(Some(payload)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_back_to_back() {
        let (mut a, mut b) = tokio::io::duplex(256);

        write_frame(&mut a, b"hello", 64).await.unwrap();
        write_frame(&mut a, b"", 64).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, 64).await.unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(read_frame(&mut b, 64).await.unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(read_frame(&mut b, 64).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected_before_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&1_000_000u32.to_le_bytes()).await.unwrap();

        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Codec(CodecError::FrameTooLarge { len: 1_000_000, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_le_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let err = read_frame(&mut b, 64).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_eof_inside_prefix() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[7, 0]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b, 64).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_prefix_split_across_writes() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move { read_frame(&mut b, 64).await });
        a.write_all(&[3, 0]).await.unwrap();
        tokio::task::yield_now().await;
        a.write_all(&[0, 0]).await.unwrap();
        a.write_all(b"xyz").await.unwrap();

        let frame = reader.await.unwrap().unwrap();
        assert_eq!(frame.as_deref(), Some(&b"xyz"[..]));
    }

    #[test]
    fn test_encode_frame_limit() {
        assert_eq!(encode_frame(b"abcd", 4).unwrap(), [4, 0, 0, 0, b'a', b'b', b'c', b'd']);
        assert_eq!(
            encode_frame(b"abcde", 4),
            Err(CodecError::FrameTooLarge { len: 5, max: 4 })
        );
    }
}
