use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::poll_fn;
use futures::io::{AsyncRead, AsyncWrite};
use log::*;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_vsock::{VsockAddr, VsockListener};
use yamux::{Connection, Mode};

use crate::channel::{self, Receiver, Sender};
use crate::config::{Config, Endpoint};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameType, read_frame};
use crate::message::{
    AverageRequest, AverageResponse, Message, Method, PrimeFactor, PrimeFactorsRequest,
    RunningMaxRequest, RunningMaxResponse, Status, SumRequest, SumResponse, Tap,
};
use crate::observe::{Direction, LogObserver, Observer};
use crate::processor::{self, Mean, RunningMax};

/// Calculator server.
///
/// Every accepted connection is a yamux session; every logical stream in it
/// is one call, served on its own task. A failing call is reported to the
/// peer and the observer and never affects other calls.
#[derive(Clone)]
pub struct Server {
    config: Config,
    observer: Arc<dyn Observer>,
    next_call: Arc<AtomicU64>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            observer: Arc::new(LogObserver),
            next_call: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Listens on `endpoint` and serves connections until the listener fails
    /// to bind. Accept errors are logged and do not stop the server.
    pub async fn run(&self, endpoint: &Endpoint) -> Result<()> {
        match endpoint {
            Endpoint::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)?;
                info!("Server listening on Unix Socket {:?}", path);
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => {
                            info!("Accepted Unix connection");
                            self.spawn_connection(stream.compat());
                        }
                        Err(e) => error!("Failed to accept Unix connection: {}", e),
                    }
                }
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Server listening on TCP {:?}", addr);
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            info!("Accepted TCP connection from {:?}", peer);
                            self.spawn_connection(stream.compat());
                        }
                        Err(e) => error!("Failed to accept TCP connection: {}", e),
                    }
                }
            }
            Endpoint::Vsock { cid, port } => {
                let listener = VsockListener::bind(VsockAddr::new(*cid, *port))?;
                info!("Server listening on Vsock CID:{} Port:{}", cid, port);
                loop {
                    match listener.accept().await {
                        Ok((stream, addr)) => {
                            info!("Accepted Vsock connection from {:?}", addr);
                            self.spawn_connection(stream.compat());
                        }
                        Err(e) => error!("Failed to accept Vsock connection: {}", e),
                    }
                }
            }
        }
    }

    fn spawn_connection<T>(&self, io: T)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve_connection(io).await {
                server.observer.stream_rejected(&e);
            }
        });
    }

    /// Drives one yamux connection and spawns a task per inbound stream.
    /// Returns when the peer closes the connection.
    pub async fn serve_connection<T>(&self, io: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut conn = Connection::new(io, self.config.yamux(), Mode::Server);

        loop {
            match poll_fn(|cx| conn.poll_next_inbound(cx)).await {
                Some(Ok(stream)) => {
                    let server = self.clone();
                    tokio::spawn(async move { server.serve_stream(stream).await });
                }
                Some(Err(e)) => {
                    error!("Connection error: {}", e);
                    return Err(e.into());
                }
                None => {
                    info!("Connection closed by remote");
                    return Ok(());
                }
            }
        }
    }

    /// Serves one call: reads the `Call` frame, dispatches to the method's
    /// processor, and turns call-level errors into a status for the peer.
    pub async fn serve_stream<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let max_payload = self.config.max_payload_size;
        let (mut reader, writer) = channel::split(stream);

        let id = match read_frame(&mut reader, max_payload).await {
            Ok(Some(Frame {
                frame_type: FrameType::Call,
                payload,
            })) if payload.len() == 1 => payload[0],
            Ok(None) => {
                debug!("Stream closed before naming a method");
                return;
            }
            Ok(Some(_)) => {
                self.observer.stream_rejected(&Error::InvalidFrame);
                return;
            }
            Err(e) => {
                self.observer.stream_rejected(&e);
                return;
            }
        };

        let Some(method) = Method::from_u8(id) else {
            let err = Error::Unimplemented(id);
            let mut outbound = Sender::<_, Status>::new(writer, max_payload);
            conclude(Err(err), &mut outbound)
                .await
                .unwrap_or_else(|e| self.observer.stream_rejected(&e));
            return;
        };

        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        self.observer.call_started(call_id, method);

        let outcome = match method {
            Method::Sum => {
                let (mut rx, mut tx) =
                    self.bind::<SumRequest, SumResponse, _, _>(reader, writer, call_id, method);
                let result = processor::sum(&mut rx, &mut tx).await;
                conclude(result, &mut tx).await
            }
            Method::DecomposeToPrimeFactors => {
                let (mut rx, mut tx) = self.bind::<PrimeFactorsRequest, PrimeFactor, _, _>(
                    reader, writer, call_id, method,
                );
                let result = self.decompose(&mut rx, &mut tx).await;
                conclude(result, &mut tx).await
            }
            Method::Average => {
                let (mut rx, mut tx) = self.bind::<AverageRequest, AverageResponse, _, _>(
                    reader, writer, call_id, method,
                );
                let result =
                    processor::collect_then_reply(Mean::default(), &mut rx, &mut tx).await;
                conclude(result, &mut tx).await
            }
            Method::RunningMax => {
                let (mut rx, mut tx) = self.bind::<RunningMaxRequest, RunningMaxResponse, _, _>(
                    reader, writer, call_id, method,
                );
                let result =
                    processor::reply_per_message(RunningMax::default(), &mut rx, &mut tx).await;
                conclude(result, &mut tx).await
            }
        };

        self.observer.call_finished(call_id, method, outcome.as_ref().err());
    }

    async fn decompose<R, W>(
        &self,
        inbound: &mut Receiver<R, PrimeFactorsRequest>,
        outbound: &mut Sender<W, PrimeFactor>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let request = inbound
            .receive()
            .await?
            .ok_or_else(|| Error::InvalidArgument("missing decomposition request".into()))?;
        processor::emit_prime_factors(request.number, outbound, self.config.factor_delay).await
    }

    /// Types both halves of a call and taps them into the observer.
    fn bind<In, Out, R, W>(
        &self,
        reader: R,
        writer: W,
        call_id: u64,
        method: Method,
    ) -> (Receiver<R, In>, Sender<W, Out>)
    where
        In: Message,
        Out: Message,
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let max_payload = self.config.max_payload_size;
        let rx = Receiver::new(reader, max_payload)
            .with_tap(self.tap(call_id, method, Direction::Inbound));
        let tx = Sender::new(writer, max_payload)
            .with_tap(self.tap(call_id, method, Direction::Outbound));
        (rx, tx)
    }

    fn tap(&self, call_id: u64, method: Method, direction: Direction) -> Tap {
        let observer = Arc::clone(&self.observer);
        Arc::new(move |message: &dyn fmt::Debug| {
            observer.message(call_id, method, direction, message)
        })
    }
}

/// Finishes a call. Call-level errors are reported to the peer as a status
/// frame; transport errors are only returned, the stream is already gone.
async fn conclude<W, M>(result: Result<()>, outbound: &mut Sender<W, M>) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let err = match result {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if let Some(status) = err.to_status() {
        if let Err(e) = outbound.fail(status).await {
            warn!("Could not report status to peer: {}", e);
        }
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Duplex;
    use crate::frame::write_frame;
    use crate::message::StatusCode;
    use tokio_util::compat::Compat;

    type Io = Compat<tokio::io::DuplexStream>;

    /// Opens a raw call against `serve_stream` without yamux in between.
    async fn raw_call<Out: Message, In: Message>(
        server: &Server,
        method: u8,
    ) -> Duplex<Io, Out, In> {
        let (a, b) = tokio::io::duplex(4096);
        let server = server.clone();
        tokio::spawn(async move { server.serve_stream(b.compat()).await });

        let mut io = a.compat();
        write_frame(&mut io, &Frame::new(FrameType::Call, vec![method]), 1024)
            .await
            .unwrap();
        Duplex::new(io, &Config::default())
    }

    #[tokio::test]
    async fn test_unknown_method_is_unimplemented() {
        let server = Server::new(Config::default());
        let mut call = raw_call::<SumRequest, SumResponse>(&server, 42).await;

        match call.receive().await {
            Err(Error::Remote { code, .. }) => assert_eq!(code, StatusCode::Unimplemented),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_average_reports_status() {
        let server = Server::new(Config::default());
        let mut call =
            raw_call::<AverageRequest, AverageResponse>(&server, Method::Average as u8).await;
        call.close_send().await.unwrap();

        assert!(matches!(call.receive().await, Err(Error::AggregationUndefined)));
        assert!(call.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_running_max_over_raw_stream() {
        let server = Server::new(Config::default());
        let method = Method::RunningMax as u8;
        let mut call = raw_call::<RunningMaxRequest, RunningMaxResponse>(&server, method).await;

        // Responses arrive while the request direction is still open.
        call.send(RunningMaxRequest { num: 3 }).await.unwrap();
        assert_eq!(call.receive().await.unwrap().unwrap().max, 3);
        call.send(RunningMaxRequest { num: 1 }).await.unwrap();
        assert_eq!(call.receive().await.unwrap().unwrap().max, 3);

        call.close_send().await.unwrap();
        assert!(call.receive().await.unwrap().is_none());
    }
}
