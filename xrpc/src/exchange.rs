//! Sender and receiver loops for one duplex call.
//!
//! The two directions progress independently: pacing or transport
//! backpressure on the send side never stalls inbound messages. [`bidi`]
//! drives both loops concurrently from the calling task, so one task owns
//! the whole stream.

use std::time::Duration;

use futures::io::{AsyncRead, AsyncWrite};
use futures::{Stream, StreamExt};

use crate::channel::{Receiver, Sender};
use crate::error::{Error, Result};
use crate::message::Message;

/// Sends every item of `requests`, waiting `pace` between two sends, then
/// half-closes exactly once.
///
/// On a failed send the loop stops, still attempts the half-close so the
/// peer can finish its side, and returns the send error. Returns the number
/// of messages sent.
pub async fn send_loop<W, M, S>(
    mut sender: Sender<W, M>,
    requests: S,
    pace: Duration,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    M: Message,
    S: Stream<Item = M>,
{
    let pumped = pump(&mut sender, requests, pace).await;
    let closed = sender.close_send().await;
    pumped?;
    closed?;
    Ok(sender.sent())
}

async fn pump<W, M, S>(sender: &mut Sender<W, M>, requests: S, pace: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
    S: Stream<Item = M>,
{
    let mut requests = std::pin::pin!(requests);
    while let Some(request) = requests.next().await {
        if sender.sent() > 0 && !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
        sender.send(request).await?;
    }
    Ok(())
}

/// Applies `handler` to every inbound message until end-of-stream. Returns
/// the number of messages handled.
pub async fn receive_loop<R, M, F>(mut receiver: Receiver<R, M>, mut handler: F) -> Result<u64>
where
    R: AsyncRead + Unpin,
    M: Message,
    F: FnMut(M),
{
    while let Some(message) = receiver.receive().await? {
        handler(message);
    }
    Ok(receiver.received())
}

/// Runs a full bidirectional exchange, polling the sender loop and the
/// receiver loop concurrently on the calling task.
///
/// Returns after the receiver observed end-of-stream and the sender loop
/// finished. A failed receive ends the exchange at once: the sender loop is
/// dropped mid-stream and the receive error returned. A failed send does not
/// stop the receiver, so responses still in flight are handled before the
/// send error is returned. When both directions fail the sender's error
/// wins.
pub async fn bidi<W, R, Out, In, S, F>(
    sender: Sender<W, Out>,
    receiver: Receiver<R, In>,
    requests: S,
    pace: Duration,
    handler: F,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    Out: Message,
    In: Message,
    S: Stream<Item = Out>,
    F: FnMut(In),
{
    let mut sending = std::pin::pin!(send_loop(sender, requests, pace));
    let mut receiving = std::pin::pin!(receive_loop(receiver, handler));

    let mut sent: Option<Result<u64>> = None;
    let received = loop {
        tokio::select! {
            result = &mut sending, if sent.is_none() => sent = Some(result),
            result = &mut receiving => break result,
        }
    };

    let (received, sent) = match (received, sent) {
        (Err(recv_err), Some(Err(send_err))) => {
            log::debug!("Both directions failed, receive error: {}", recv_err);
            return Err(send_err);
        }
        (Err(recv_err), _) => return Err(recv_err),
        (Ok(received), Some(sent)) => (received, sent?),
        (Ok(received), None) => (received, sending.await?),
    };
    log::debug!("Exchange finished: sent={}, received={}", sent, received);
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Duplex;
    use crate::config::Config;
    use crate::message::{RunningMaxRequest, RunningMaxResponse, Status, StatusCode};
    use futures::stream;
    use std::time::Instant;
    use tokio_util::compat::TokioAsyncReadCompatExt;

    fn requests(values: Vec<i64>) -> impl Stream<Item = RunningMaxRequest> + Send + 'static {
        stream::iter(values).map(|num| RunningMaxRequest { num })
    }

    /// Peer that echoes each request back and closes after the client does.
    async fn echo_peer(io: tokio::io::DuplexStream, delay: Duration) -> Result<()> {
        let mut peer: Duplex<_, RunningMaxResponse, RunningMaxRequest> =
            Duplex::new(io.compat(), &Config::default());
        while let Some(req) = peer.receive().await? {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            peer.send(RunningMaxResponse { max: req.num }).await?;
        }
        peer.close_send().await
    }

    #[tokio::test]
    async fn test_bidi_returns_after_end_of_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let peer = tokio::spawn(echo_peer(b, Duration::ZERO));

        let (tx, rx) = Duplex::<_, RunningMaxRequest, RunningMaxResponse>::new(
            a.compat(),
            &Config::default(),
        )
        .split();

        let mut seen = Vec::new();
        let received = bidi(tx, rx, requests(vec![4, 8, 15, 16, 23, 42]), Duration::ZERO, |resp| {
            seen.push(resp.max)
        })
        .await
        .unwrap();

        assert_eq!(received, 6);
        assert_eq!(seen, vec![4, 8, 15, 16, 23, 42]);
        peer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_receiver_does_not_deadlock() {
        // A tiny pipe forces the sender to park on backpressure while the
        // peer is still working through earlier messages.
        let (a, b) = tokio::io::duplex(32);
        let peer = tokio::spawn(echo_peer(b, Duration::from_millis(2)));

        let (tx, rx) = Duplex::<_, RunningMaxRequest, RunningMaxResponse>::new(
            a.compat(),
            &Config::default(),
        )
        .split();

        let values: Vec<i64> = (0..200).collect();
        let mut seen = Vec::new();
        let received = tokio::time::timeout(
            Duration::from_secs(10),
            bidi(tx, rx, requests(values.clone()), Duration::ZERO, |resp| seen.push(resp.max)),
        )
        .await
        .expect("exchange deadlocked")
        .unwrap();

        assert_eq!(received, 200);
        assert_eq!(seen, values);
        peer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pace_spaces_sends() {
        let (a, b) = tokio::io::duplex(1024);
        let peer = tokio::spawn(echo_peer(b, Duration::ZERO));
        let (tx, rx) = Duplex::<_, RunningMaxRequest, RunningMaxResponse>::new(
            a.compat(),
            &Config::default(),
        )
        .split();

        let start = Instant::now();
        bidi(tx, rx, requests(vec![1, 2, 3]), Duration::from_millis(20), |_| {})
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        peer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_failure_still_drains_receiver() {
        let (a, b) = tokio::io::duplex(1024);
        let peer = tokio::spawn(echo_peer(b, Duration::ZERO));

        let (mut tx, rx) = Duplex::<_, RunningMaxRequest, RunningMaxResponse>::new(
            a.compat(),
            &Config::default(),
        )
        .split();
        tx.send(RunningMaxRequest { num: 9 }).await.unwrap();
        tx.close_send().await.unwrap();

        // The loop's first send hits the already closed direction.
        let mut seen = Vec::new();
        let result = bidi(tx, rx, requests(vec![1]), Duration::ZERO, |resp| {
            seen.push(resp.max)
        })
        .await;

        assert!(matches!(result, Err(Error::ChannelClosed)));
        // The message that made it out before the failure was still answered.
        assert_eq!(seen, vec![9]);
        peer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_receive_failure_stops_sending() {
        let (a, b) = tokio::io::duplex(1024);
        let peer = tokio::spawn(async move {
            let peer: Duplex<_, RunningMaxResponse, RunningMaxRequest> =
                Duplex::new(b.compat(), &Config::default());
            let (mut tx, mut rx) = peer.split();
            rx.receive().await?;
            tx.fail(Status::new(StatusCode::Internal, "processor crashed"))
                .await
        });

        let (tx, rx) = Duplex::<_, RunningMaxRequest, RunningMaxResponse>::new(
            a.compat(),
            &Config::default(),
        )
        .split();

        // Twenty paced sends would take two seconds to run out.
        let start = Instant::now();
        let result = bidi(
            tx,
            rx,
            requests((0..20).collect()),
            Duration::from_millis(100),
            |_| {},
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::Remote {
                code: StatusCode::Internal,
                ..
            })
        ));
        assert!(start.elapsed() < Duration::from_millis(500));
        peer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_long_exchange_completes() {
        let (a, b) = tokio::io::duplex(256);
        let peer = tokio::spawn(echo_peer(b, Duration::ZERO));
        let (tx, rx) = Duplex::<_, RunningMaxRequest, RunningMaxResponse>::new(
            a.compat(),
            &Config::default(),
        )
        .split();

        let mut count = 0i64;
        let received = tokio::time::timeout(
            Duration::from_secs(20),
            bidi(tx, rx, requests((0..5_000).collect()), Duration::ZERO, |resp| {
                assert_eq!(resp.max, count);
                count += 1;
            }),
        )
        .await
        .expect("exchange stalled")
        .unwrap();

        assert_eq!(received, 5_000);
        peer.await.unwrap().unwrap();
    }
}
