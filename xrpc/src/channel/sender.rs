//! Send direction of a duplex channel.

use std::marker::PhantomData;

use futures::io::{AsyncWrite, AsyncWriteExt};

use super::ChannelState;
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameType, write_frame};
use crate::message::{Message, Status, Tap};

/// Send direction of a call.
///
/// Messages reach the peer in the order `send` was called. `send` suspends
/// while the transport applies backpressure.
pub struct Sender<W, M> {
    writer: W,
    state: ChannelState,
    max_payload: usize,
    sent: u64,
    tap: Option<Tap>,
    _message: PhantomData<fn(M)>,
}

impl<W, M> Sender<W, M>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    pub fn new(writer: W, max_payload: usize) -> Self {
        Self {
            writer,
            state: ChannelState::Open,
            max_payload,
            sent: 0,
            tap: None,
            _message: PhantomData,
        }
    }

    /// Reports every successfully sent message to `tap`.
    pub fn with_tap(mut self, tap: Tap) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Messages sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub async fn send(&mut self, message: M) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(Error::ChannelClosed);
        }
        let frame = Frame::new(FrameType::Data, message.to_bytes());
        self.write(&frame).await?;
        self.sent += 1;
        if let Some(tap) = &self.tap {
            tap(&message);
        }
        Ok(())
    }

    /// Marks the end of the messages and half-closes the send direction.
    /// Calling it again is a no-op.
    pub async fn close_send(&mut self) -> Result<()> {
        if self.state != ChannelState::Open {
            return Ok(());
        }
        self.write(&Frame::end()).await?;
        self.shutdown().await
    }

    /// Ends the call with an error status, then half-closes.
    pub async fn fail(&mut self, status: Status) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(Error::ChannelClosed);
        }
        let frame = Frame::new(FrameType::Status, status.to_bytes());
        self.write(&frame).await?;
        self.shutdown().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.state = ChannelState::Closed;
        self.writer.close().await?;
        log::trace!("Send direction closed after {} messages", self.sent);
        Ok(())
    }

    async fn write(&mut self, frame: &Frame) -> Result<()> {
        let result = write_frame(&mut self.writer, frame, self.max_payload).await;
        if let Err(Error::Transport(_)) = &result {
            // A broken writer cannot be closed cleanly later.
            self.state = ChannelState::Ended;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::read_frame;
    use crate::message::{AverageRequest, StatusCode};
    use futures::io::Cursor;

    #[tokio::test]
    async fn test_send_writes_data_frames() {
        let mut sender = Sender::<_, AverageRequest>::new(Cursor::new(Vec::new()), 1024);
        sender.send(AverageRequest { num: 1.5 }).await.unwrap();
        sender.send(AverageRequest { num: 2.5 }).await.unwrap();
        assert_eq!(sender.sent(), 2);

        let mut wire = Cursor::new(sender.writer.into_inner());
        for expected in [1.5, 2.5] {
            let frame = read_frame(&mut wire, 1024).await.unwrap().unwrap();
            assert_eq!(frame.frame_type, FrameType::Data);
            assert_eq!(AverageRequest::decode(&frame.payload).unwrap().num, expected);
        }
        assert!(read_frame(&mut wire, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_send_writes_end_marker_once() {
        let mut sender = Sender::<_, AverageRequest>::new(Cursor::new(Vec::new()), 1024);
        sender.send(AverageRequest { num: 3.0 }).await.unwrap();
        sender.close_send().await.unwrap();
        sender.close_send().await.unwrap();
        assert_eq!(sender.state(), ChannelState::Closed);

        let mut wire = Cursor::new(sender.writer.into_inner());
        let data = read_frame(&mut wire, 1024).await.unwrap().unwrap();
        assert_eq!(data.frame_type, FrameType::Data);
        let end = read_frame(&mut wire, 1024).await.unwrap().unwrap();
        assert_eq!(end.frame_type, FrameType::End);
        assert!(read_frame(&mut wire, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_writes_status_and_closes() {
        let mut sender = Sender::<_, AverageRequest>::new(Cursor::new(Vec::new()), 1024);
        sender
            .fail(Status::new(StatusCode::AggregationUndefined, "no values received"))
            .await
            .unwrap();
        assert_eq!(sender.state(), ChannelState::Closed);
        assert!(matches!(
            sender.send(AverageRequest { num: 1.0 }).await,
            Err(Error::ChannelClosed)
        ));

        let mut wire = Cursor::new(sender.writer.into_inner());
        let frame = read_frame(&mut wire, 1024).await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Status);
        let status = Status::decode(&frame.payload).unwrap();
        assert_eq!(status.code, StatusCode::AggregationUndefined);
        // The status is terminal; no end marker follows it.
        assert!(read_frame(&mut wire, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_message_keeps_channel_open() {
        let mut sender = Sender::<_, AverageRequest>::new(Cursor::new(Vec::new()), 4);
        assert!(matches!(
            sender.send(AverageRequest { num: 1.0 }).await,
            Err(Error::PayloadTooLarge)
        ));
        assert_eq!(sender.state(), ChannelState::Open);
        assert_eq!(sender.sent(), 0);
    }
}
