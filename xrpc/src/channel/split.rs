//! Read and write halves of one I/O object that may live on different tasks.
//!
//! Both halves poll the shared object under a lock, with a waker that wakes
//! every task waiting on either half. A yamux stream keeps a single waker
//! slot for the commands it sends to its connection on behalf of both
//! directions, so a wake registered by one half can otherwise overwrite the
//! other's and leave that task parked for good.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

use futures::io::{AsyncRead, AsyncWrite};

pub fn split<T>(io: T) -> (ReadHalf<T>, WriteHalf<T>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let shared = Arc::new(Shared {
        io: Mutex::new(io),
        wakers: Arc::new(Wakers::default()),
    });
    (
        ReadHalf {
            shared: Arc::clone(&shared),
        },
        WriteHalf { shared },
    )
}

pub struct ReadHalf<T> {
    shared: Arc<Shared<T>>,
}

pub struct WriteHalf<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    io: Mutex<T>,
    wakers: Arc<Wakers>,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Read,
    Write,
}

#[derive(Default)]
struct Wakers {
    read: Mutex<Option<Waker>>,
    write: Mutex<Option<Waker>>,
}

impl Wakers {
    fn slot(&self, side: Side) -> &Mutex<Option<Waker>> {
        match side {
            Side::Read => &self.read,
            Side::Write => &self.write,
        }
    }
}

impl Wake for Wakers {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        for side in [Side::Read, Side::Write] {
            let waker = lock(self.slot(side)).clone();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Unpin> Shared<T> {
    fn poll_with<R>(
        &self,
        side: Side,
        cx: &mut Context<'_>,
        poll: impl FnOnce(Pin<&mut T>, &mut Context<'_>) -> Poll<R>,
    ) -> Poll<R> {
        {
            let mut registered = lock(self.wakers.slot(side));
            if !registered.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                *registered = Some(cx.waker().clone());
            }
        }
        let waker = Waker::from(Arc::clone(&self.wakers));
        let mut shared_cx = Context::from_waker(&waker);
        let mut io = lock(&self.io);
        poll(Pin::new(&mut *io), &mut shared_cx)
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ReadHalf<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        self.shared
            .poll_with(Side::Read, cx, |io, cx| io.poll_read(cx, buf))
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for WriteHalf<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.shared
            .poll_with(Side::Write, cx, |io, cx| io.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared
            .poll_with(Side::Write, cx, |io, cx| io.poll_flush(cx))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared
            .poll_with(Side::Write, cx, |io, cx| io.poll_close(cx))
    }
}
