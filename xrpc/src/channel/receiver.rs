//! Receive direction of a duplex channel.

use std::io;
use std::marker::PhantomData;

use futures::io::AsyncRead;

use super::ChannelState;
use crate::error::{Error, Result};
use crate::frame::{FrameType, read_frame};
use crate::message::{Message, Status, Tap};

/// Receive direction of a call.
pub struct Receiver<R, M> {
    reader: R,
    state: ChannelState,
    max_payload: usize,
    received: u64,
    tap: Option<Tap>,
    _message: PhantomData<fn() -> M>,
}

impl<R, M> Receiver<R, M>
where
    R: AsyncRead + Unpin,
    M: Message,
{
    pub fn new(reader: R, max_payload: usize) -> Self {
        Self {
            reader,
            state: ChannelState::Open,
            max_payload,
            received: 0,
            tap: None,
            _message: PhantomData,
        }
    }

    /// Reports every received message to `tap`.
    pub fn with_tap(mut self, tap: Tap) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Messages received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` once the peer half-closed, and on every call after
    /// that. A status frame from the peer is returned as its typed error and
    /// also ends the direction. A stream cut off before the peer's end
    /// marker (connection lost, peer gone) is a transport error.
    pub async fn receive(&mut self) -> Result<Option<M>> {
        if self.state == ChannelState::Ended {
            return Ok(None);
        }

        let outcome = self.next_message().await;
        match &outcome {
            Ok(Some(message)) => {
                self.received += 1;
                if let Some(tap) = &self.tap {
                    tap(message);
                }
            }
            Ok(None) => {
                log::trace!("End of stream after {} messages", self.received);
                self.state = ChannelState::Ended;
            }
            Err(_) => self.state = ChannelState::Ended,
        }
        outcome
    }

    async fn next_message(&mut self) -> Result<Option<M>> {
        let Some(frame) = read_frame(&mut self.reader, self.max_payload).await? else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended without an end-of-stream marker",
            )
            .into());
        };
        match frame.frame_type {
            FrameType::Data => M::decode(&frame.payload).map(Some),
            FrameType::End => Ok(None),
            FrameType::Status => Err(Status::decode(&frame.payload)?.into_error()),
            FrameType::Call => Err(Error::InvalidFrame),
        }
    }
}
