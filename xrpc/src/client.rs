use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::poll_fn;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{Stream, StreamExt};
use log::*;
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_vsock::{VsockAddr, VsockStream};
use yamux::{Connection, Mode};

use crate::channel::{Duplex, ReadHalf, Receiver};
use crate::config::{Config, Endpoint};
use crate::error::{Error, Result};
use crate::exchange;
use crate::frame::{Frame, FrameType, write_frame};
use crate::message::{
    AverageRequest, AverageResponse, Message, Method, PrimeFactor, PrimeFactorsRequest,
    RunningMaxRequest, RunningMaxResponse, SumRequest, SumResponse,
};

/// A call in flight: requests go out as `Out`, responses come back as `In`.
pub type Call<Out, In> = Duplex<CallStream, Out, In>;

/// The yamux stream of one call. It keeps the connection open while it
/// lives, even after every [`Client`] handle was dropped.
pub struct CallStream {
    stream: yamux::Stream,
    _lease: mpsc::Sender<Command>,
}

impl AsyncRead for CallStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for CallStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_close(cx)
    }
}

enum Command {
    Open(oneshot::Sender<Result<yamux::Stream>>),
    Close,
}

/// Calculator client.
///
/// All calls share one yamux connection, each on its own logical stream.
/// A background task drives the connection. It keeps running while calls
/// are in flight even if every `Client` handle was dropped, and closes the
/// connection once the last handle and the last call are gone, when
/// [`Client::close`] is called, or when the peer goes away.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    config: Config,
}

impl Client {
    pub async fn connect(endpoint: &Endpoint, config: Config) -> Result<Self> {
        info!("Connecting to target: {}", endpoint);
        let client = match endpoint {
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                info!("Unix socket connected.");
                Self::from_io(stream.compat(), config)
            }
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                info!("TCP socket connected.");
                Self::from_io(stream.compat(), config)
            }
            Endpoint::Vsock { cid, port } => {
                let stream = VsockStream::connect(VsockAddr::new(*cid, *port)).await?;
                info!("Vsock socket connected.");
                Self::from_io(stream.compat(), config)
            }
        };
        Ok(client)
    }

    /// Starts a client session over an already connected byte stream.
    pub fn from_io<T>(io: T, config: Config) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = Connection::new(io, config.yamux(), Mode::Client);
        let (commands, queue) = mpsc::channel(16);
        tokio::spawn(drive(conn, queue));
        Self { commands, config }
    }

    /// Closes the connection, ending every call still in flight.
    pub async fn close(self) -> Result<()> {
        self.commands
            .send(Command::Close)
            .await
            .map_err(|_| connection_gone())
    }

    /// Opens a logical stream for `method`.
    pub async fn call<Out, In>(&self, method: Method) -> Result<Call<Out, In>>
    where
        Out: Message,
        In: Message,
    {
        let (reply, opened) = oneshot::channel();
        self.commands
            .send(Command::Open(reply))
            .await
            .map_err(|_| connection_gone())?;
        let stream = opened.await.map_err(|_| connection_gone())??;
        debug!("Opened stream {} for {}", stream.id(), method.name());

        let mut stream = CallStream {
            stream,
            _lease: self.commands.clone(),
        };
        let frame = Frame::new(FrameType::Call, vec![method as u8]);
        write_frame(&mut stream, &frame, self.config.max_payload_size).await?;
        Ok(Duplex::new(stream, &self.config))
    }

    /// Unary: `num1 + num2`.
    pub async fn sum(&self, num1: i64, num2: i64) -> Result<i64> {
        let mut call = self.call::<SumRequest, SumResponse>(Method::Sum).await?;
        call.send(SumRequest { num1, num2 }).await?;
        call.close_send().await?;
        let response = single_response(call.receive().await?)?;
        Ok(response.result)
    }

    /// Server streaming: the returned receiver yields each prime factor of
    /// `number` as the server finds it.
    pub async fn decompose_to_prime_factors(
        &self,
        number: u64,
    ) -> Result<Receiver<ReadHalf<CallStream>, PrimeFactor>> {
        let call = self
            .call::<PrimeFactorsRequest, PrimeFactor>(Method::DecomposeToPrimeFactors)
            .await?;
        let (mut tx, rx) = call.split();
        tx.send(PrimeFactorsRequest { number }).await?;
        tx.close_send().await?;
        Ok(rx)
    }

    /// Client streaming: mean of every value in `values`, sent `pace` apart.
    /// Zero values yield [`Error::AggregationUndefined`].
    pub async fn average<S>(&self, values: S, pace: Duration) -> Result<f64>
    where
        S: Stream<Item = f64>,
    {
        let call = self
            .call::<AverageRequest, AverageResponse>(Method::Average)
            .await?;
        let (tx, mut rx) = call.split();
        let requests = values.map(|num| AverageRequest { num });
        let sent = exchange::send_loop(tx, requests, pace).await?;
        debug!("Average sent {} values", sent);

        let response = single_response(rx.receive().await?)?;
        Ok(response.result)
    }

    /// Opens a RunningMax call for callers that drive both directions
    /// themselves.
    pub async fn running_max(&self) -> Result<Call<RunningMaxRequest, RunningMaxResponse>> {
        self.call(Method::RunningMax).await
    }

    /// Bidirectional: streams `values` (sent `pace` apart) while `on_max`
    /// handles each running maximum as it arrives. Returns once the server
    /// closed its side.
    pub async fn running_max_with<S, F>(
        &self,
        values: S,
        pace: Duration,
        mut on_max: F,
    ) -> Result<u64>
    where
        S: Stream<Item = i64>,
        F: FnMut(i64),
    {
        let (tx, rx) = self.running_max().await?.split();
        let requests = values.map(|num| RunningMaxRequest { num });
        exchange::bidi(tx, rx, requests, pace, |response: RunningMaxResponse| {
            on_max(response.max)
        })
        .await
    }
}

fn connection_gone() -> Error {
    Error::Transport(io::Error::new(
        io::ErrorKind::NotConnected,
        "connection driver stopped",
    ))
}

fn single_response<M>(response: Option<M>) -> Result<M> {
    response.ok_or_else(|| {
        Error::Transport(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "call ended without a response",
        ))
    })
}

/// Owns the yamux connection. Polling inbound keeps frames moving for every
/// open stream; open requests are served one at a time in arrival order.
/// The command queue ends once every `Client` and `CallStream` is dropped.
async fn drive<T>(mut conn: Connection<T>, mut commands: mpsc::Receiver<Command>)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut pending: Option<oneshot::Sender<Result<yamux::Stream>>> = None;

    let outcome = poll_fn(|cx| {
        loop {
            match conn.poll_next_inbound(cx) {
                Poll::Ready(Some(Ok(stream))) => {
                    debug!("Dropping unexpected inbound stream {}", stream.id());
                    continue;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(None) => return Poll::Ready(Ok(false)),
                Poll::Pending => {}
            }

            if let Some(reply) = pending.take() {
                match conn.poll_new_outbound(cx) {
                    Poll::Ready(opened) => {
                        let _ = reply.send(opened.map_err(Error::from));
                        continue;
                    }
                    Poll::Pending => {
                        pending = Some(reply);
                        return Poll::Pending;
                    }
                }
            }

            match commands.poll_recv(cx) {
                Poll::Ready(Some(Command::Open(reply))) => pending = Some(reply),
                Poll::Ready(Some(Command::Close)) => return Poll::Ready(Ok(true)),
                Poll::Ready(None) => {
                    debug!("No handles or calls left");
                    return Poll::Ready(Ok(true));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    })
    .await;

    match outcome {
        Ok(true) => match poll_fn(|cx| conn.poll_close(cx)).await {
            Ok(()) => info!("Connection closed"),
            Err(e) => error!("Connection close error: {}", e),
        },
        Ok(false) => info!("Connection closed by remote"),
        Err(e) => error!("Connection error: {}", e),
    }
}
