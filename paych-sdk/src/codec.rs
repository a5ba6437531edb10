//! Length-prefixed framing for the raw transport.
//!
//! Every frame is `[u16 big-endian length][length bytes of payload]`. The
//! payload of a raw-transport frame is a JSON [`Envelope`].

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::objects::Envelope;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the connection on a frame boundary.
    #[error("connection closed")]
    Closed,
    /// The connection ended in the middle of a frame; `expected` is the
    /// length of the part that was cut short (header or payload).
    #[error("truncated frame: expected {expected} bytes")]
    Truncated { expected: usize },
    #[error("frame payload of {0} bytes exceeds {MAX_PAYLOAD_LEN}")]
    TooLarge(usize),
    /// A zero-length frame where a message was expected.
    #[error("empty frame")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `None` and leaves `buf` untouched when it does not yet hold the
/// whole frame its header declares.
pub fn decode_frame(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < HEADER_LEN + len {
        return None;
    }
    buf.advance(HEADER_LEN);
    Some(buf.split_to(len).freeze())
}

/// Read one frame's payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    // EOF before the first header byte is a clean close; after it, the
    // header itself is cut short.
    if reader.read(&mut header[..1]).await? == 0 {
        return Err(FrameError::Closed);
    }
    match reader.read_exact(&mut header[1..]).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Truncated {
                expected: HEADER_LEN,
            });
        }
        Err(e) => return Err(e.into()),
    }

    let len = u16::from_be_bytes(header) as usize;
    let mut payload = BytesMut::zeroed(len);
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(payload.freeze()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(FrameError::Truncated { expected: len })
        }
        Err(e) => Err(e.into()),
    }
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode its envelope.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope, FrameError>
where
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader).await?;
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(Envelope::from_slice(&payload)?)
}

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = envelope.to_vec()?;
    write_frame(writer, &payload).await
}
