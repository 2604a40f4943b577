//! Frame definition and async I/O over a single logical stream.
//!
//! Every RPC call runs on its own yamux stream. The stream carries a
//! sequence of frames. A direction that finished cleanly ends with an `End`
//! frame (or a `Status` frame when the call failed) before the byte stream
//! is closed; a byte stream that stops without one was cut off.
//!
//! # Frame Format
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |     Type      |           Reserved            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Payload...                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Integrity is left to the transport underneath yamux (TCP, Unix socket
//! or vsock).

use std::io;

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::VERSION;
use crate::error::{Error, Result};

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Frame type indicating the purpose of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Opens a call; payload is the method id. Always first on a stream.
    Call = 0x01,

    /// One encoded message.
    Data = 0x02,

    /// Terminal error status. The sender closes its direction right after.
    Status = 0x03,

    /// Clean end of one direction. Carries no payload.
    End = 0x04,
}

impl FrameType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Call),
            0x02 => Some(Self::Data),
            0x03 => Some(Self::Status),
            0x04 => Some(Self::End),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    pub fn end() -> Self {
        Self::new(FrameType::End, Vec::new())
    }

    /// Serializes header and payload into one contiguous buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.push(VERSION);
        buf.push(self.frame_type as u8);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Decoded header, before the payload has been read.
#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    frame_type: FrameType,
    length: usize,
}

impl FrameHeader {
    fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self> {
        if buf[0] != VERSION {
            return Err(Error::VersionMismatch);
        }
        let frame_type = FrameType::from_u8(buf[1]).ok_or(Error::InvalidFrame)?;
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if frame_type == FrameType::End && length != 0 {
            return Err(Error::InvalidFrame);
        }

        Ok(Self { frame_type, length })
    }
}

/// Reads the next frame.
///
/// Returns `Ok(None)` when the byte stream ends exactly at a frame boundary.
/// A stream that ends inside a frame is a transport error.
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader.read(&mut header_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let header = FrameHeader::parse(&header_buf)?;
    if header.length > max_payload {
        return Err(Error::PayloadTooLarge);
    }

    let mut payload = vec![0u8; header.length];
    reader.read_exact(&mut payload).await?;

    log::trace!(
        "Received frame type={:?}, len={}",
        header.frame_type,
        payload.len()
    );
    Ok(Some(Frame::new(header.frame_type, payload)))
}

/// Writes one frame and flushes it so the peer sees it without waiting for
/// more traffic.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_payload: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.payload.len() > max_payload {
        return Err(Error::PayloadTooLarge);
    }
    writer.write_all(&frame.serialize()).await?;
    writer.flush().await?;

    log::trace!(
        "Sent frame type={:?}, len={}",
        frame.frame_type,
        frame.payload.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    const MAX: usize = 1024;

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let mut wire = Vec::new();
        wire.extend(Frame::new(FrameType::Call, vec![4]).serialize());
        wire.extend(Frame::new(FrameType::Data, b"first".to_vec()).serialize());
        wire.extend(Frame::new(FrameType::Data, Vec::new()).serialize());
        wire.extend(Frame::end().serialize());

        let mut reader = Cursor::new(wire);
        let call = read_frame(&mut reader, MAX).await.unwrap().unwrap();
        assert_eq!(call.frame_type, FrameType::Call);
        assert_eq!(call.payload, vec![4]);

        let data = read_frame(&mut reader, MAX).await.unwrap().unwrap();
        assert_eq!(data.payload, b"first");

        let empty = read_frame(&mut reader, MAX).await.unwrap().unwrap();
        assert!(empty.payload.is_empty());

        let end = read_frame(&mut reader, MAX).await.unwrap().unwrap();
        assert_eq!(end.frame_type, FrameType::End);

        assert!(read_frame(&mut reader, MAX).await.unwrap().is_none());
    }

    #[test]
    fn test_header_layout() {
        let wire = Frame::new(FrameType::Data, vec![0xAB; 3]).serialize();
        assert_eq!(wire.len(), FRAME_HEADER_SIZE + 3);
        assert_eq!(&wire[..FRAME_HEADER_SIZE], &[VERSION, 0x02, 0, 0, 0, 0, 0, 3]);
    }

    #[tokio::test]
    async fn test_end_frame_with_payload_is_invalid() {
        let wire = Frame::new(FrameType::End, vec![1]).serialize();
        let result = read_frame(&mut Cursor::new(wire), MAX).await;
        assert!(matches!(result, Err(Error::InvalidFrame)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_transport_error() {
        let wire = Frame::new(FrameType::Data, b"payload".to_vec()).serialize();

        let result = read_frame(&mut Cursor::new(wire[..5].to_vec()), MAX).await;
        match result {
            Err(Error::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected {other:?}"),
        }

        let result = read_frame(&mut Cursor::new(wire[..wire.len() - 1].to_vec()), MAX).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_rejects_bad_header() {
        let mut wire = Frame::new(FrameType::Data, Vec::new()).serialize();
        wire[0] = VERSION + 1;
        let result = read_frame(&mut Cursor::new(wire), MAX).await;
        assert!(matches!(result, Err(Error::VersionMismatch)));

        let mut wire = Frame::new(FrameType::Data, Vec::new()).serialize();
        wire[1] = 0x7F;
        let result = read_frame(&mut Cursor::new(wire), MAX).await;
        assert!(matches!(result, Err(Error::InvalidFrame)));
    }

    #[tokio::test]
    async fn test_payload_limit() {
        let frame = Frame::new(FrameType::Data, vec![0xAB; 64]);

        let mut sink = Cursor::new(Vec::new());
        let result = write_frame(&mut sink, &frame, 32).await;
        assert!(matches!(result, Err(Error::PayloadTooLarge)));

        let result = read_frame(&mut Cursor::new(frame.serialize()), 32).await;
        assert!(matches!(result, Err(Error::PayloadTooLarge)));
    }
}
