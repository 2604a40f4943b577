//! Typed duplex channel over one logical stream.
//!
//! A [`Duplex`] owns both directions of a call. It can be driven directly,
//! or split into a [`Sender`] and a [`Receiver`] that progress on separate
//! tasks. Half-closing the send direction never affects the receive
//! direction.

mod receiver;
mod sender;
mod split;

use futures::io::{AsyncRead, AsyncWrite};

pub use receiver::Receiver;
pub use sender::Sender;
pub use split::{ReadHalf, WriteHalf, split};

use crate::config::Config;
use crate::error::Result;
use crate::message::Message;

/// State of one direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Direction is open and operational.
    Open,

    /// Local side half-closed its send direction.
    Closed,

    /// Peer signalled end-of-stream, or the direction failed.
    Ended,
}

/// Both directions of one call: `Out` messages are sent, `In` messages are
/// received.
pub struct Duplex<T, Out, In> {
    sender: Sender<WriteHalf<T>, Out>,
    receiver: Receiver<ReadHalf<T>, In>,
}

impl<T, Out, In> Duplex<T, Out, In>
where
    T: AsyncRead + AsyncWrite + Unpin,
    Out: Message,
    In: Message,
{
    pub fn new(io: T, config: &Config) -> Self {
        let (reader, writer) = split(io);
        Self {
            sender: Sender::new(writer, config.max_payload_size),
            receiver: Receiver::new(reader, config.max_payload_size),
        }
    }

    pub async fn send(&mut self, message: Out) -> Result<()> {
        self.sender.send(message).await
    }

    pub async fn close_send(&mut self) -> Result<()> {
        self.sender.close_send().await
    }

    pub async fn receive(&mut self) -> Result<Option<In>> {
        self.receiver.receive().await
    }

    /// Splits into independently driven halves.
    pub fn split(self) -> (Sender<WriteHalf<T>, Out>, Receiver<ReadHalf<T>, In>) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::{RunningMaxRequest, RunningMaxResponse};
    use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

    type Client = Duplex<Compat<tokio::io::DuplexStream>, RunningMaxRequest, RunningMaxResponse>;
    type Peer = Duplex<Compat<tokio::io::DuplexStream>, RunningMaxResponse, RunningMaxRequest>;

    fn pair(capacity: usize) -> (Client, Peer) {
        let (a, b) = tokio::io::duplex(capacity);
        let config = Config::default();
        (Duplex::new(a.compat(), &config), Duplex::new(b.compat(), &config))
    }

    #[tokio::test]
    async fn test_messages_arrive_in_send_order() {
        let (mut client, mut peer) = pair(4096);

        for num in [3, -1, 7] {
            client.send(RunningMaxRequest { num }).await.unwrap();
        }
        client.close_send().await.unwrap();

        let mut received = Vec::new();
        while let Some(msg) = peer.receive().await.unwrap() {
            received.push(msg.num);
        }
        assert_eq!(received, vec![3, -1, 7]);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_sticky() {
        let (mut client, mut peer) = pair(4096);
        client.close_send().await.unwrap();

        assert!(peer.receive().await.unwrap().is_none());
        assert!(peer.receive().await.unwrap().is_none());
        assert!(peer.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_half_close_keeps_other_direction_open() {
        let (mut client, mut peer) = pair(4096);

        client.send(RunningMaxRequest { num: 5 }).await.unwrap();
        client.close_send().await.unwrap();

        assert_eq!(peer.receive().await.unwrap().unwrap().num, 5);
        assert!(peer.receive().await.unwrap().is_none());

        // The peer still answers after the client stopped sending.
        peer.send(RunningMaxResponse { max: 5 }).await.unwrap();
        peer.close_send().await.unwrap();

        assert_eq!(client.receive().await.unwrap().unwrap().max, 5);
        assert!(client.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut client, _peer) = pair(4096);
        client.close_send().await.unwrap();
        client.close_send().await.unwrap();

        let result = client.send(RunningMaxRequest { num: 1 }).await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_split_halves_run_on_separate_tasks() {
        let (client, mut peer) = pair(64);
        let (mut tx, mut rx) = client.split();

        let sender = tokio::spawn(async move {
            for num in 0..100 {
                tx.send(RunningMaxRequest { num }).await?;
            }
            tx.close_send().await
        });

        // Echo back everything the client sends.
        let echo = tokio::spawn(async move {
            while let Some(req) = peer.receive().await? {
                peer.send(RunningMaxResponse { max: req.num }).await?;
            }
            peer.close_send().await
        });

        let mut seen = Vec::new();
        while let Some(resp) = rx.receive().await.unwrap() {
            seen.push(resp.max);
        }

        sender.await.unwrap().unwrap();
        echo.await.unwrap().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
