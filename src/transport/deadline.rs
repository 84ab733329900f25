//! Per-operation I/O deadlines.
//!
//! [`DeadlineStream`] re-arms an idle deadline at the start of every read and
//! every write, so a peer that accepts the connection and then trickles bytes
//! arbitrarily slowly is cut off after `timeout` of silence, no matter how long
//! the connection as a whole has been alive.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// One armed-or-idle deadline for a single direction of traffic.
#[derive(Debug, Default)]
struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
    armed: bool,
}

impl Deadline {
    /// Arms the deadline for a new operation. An operation that is already in
    /// flight (polled before, still pending) keeps its original deadline.
    fn arm(&mut self, timeout: Duration) {
        if self.armed {
            return;
        }

        let Some(at) = Instant::now().checked_add(timeout) else {
            return;
        };
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(at))),
        }
        self.armed = true;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.armed {
            return false;
        }
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

pin_project! {
    /// Byte stream wrapper enforcing an idle deadline on each I/O operation.
    ///
    /// A zero timeout disables deadlines entirely; operations then block for as
    /// long as the wrapped stream does.
    #[derive(Debug)]
    pub struct DeadlineStream<S> {
        #[pin]
        inner: S,
        timeout: Option<Duration>,
        read: Deadline,
        write: Deadline,
        closed: bool,
    }
}

impl<S> DeadlineStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout: (!timeout.is_zero()).then_some(timeout),
            read: Deadline::default(),
            write: Deadline::default(),
            closed: false,
        }
    }

    /// Idle timeout applied to each operation, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn timed_out(direction: &str, timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{direction} timed out after {:.3}s of inactivity", timeout.as_secs_f64()),
    )
}

fn closed() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "cannot set deadline on a closed connection",
    )
}

/// Drives one deadline-bounded operation against `poll_op`.
fn poll_with_deadline<T>(
    deadline: &mut Deadline,
    timeout: Duration,
    direction: &str,
    cx: &mut Context<'_>,
    poll_op: impl FnOnce(&mut Context<'_>) -> Poll<io::Result<T>>,
) -> Poll<io::Result<T>> {
    deadline.arm(timeout);
    match poll_op(cx) {
        Poll::Ready(result) => {
            deadline.disarm();
            Poll::Ready(result)
        }
        Poll::Pending => {
            if deadline.poll_expired(cx) {
                deadline.disarm();
                Poll::Ready(Err(timed_out(direction, timeout)))
            } else {
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncRead> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let Some(timeout) = *this.timeout else {
            return this.inner.poll_read(cx, buf);
        };

        // Half-closed: the peer may still be sending.
        let inner = this.inner;
        poll_with_deadline(this.read, timeout, "read", cx, |cx| inner.poll_read(cx, buf))
    }
}

impl<S: AsyncWrite> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let Some(timeout) = *this.timeout else {
            return this.inner.poll_write(cx, buf);
        };
        if *this.closed {
            return Poll::Ready(Err(closed()));
        }

        let inner = this.inner;
        poll_with_deadline(this.write, timeout, "write", cx, |cx| inner.poll_write(cx, buf))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let Some(timeout) = *this.timeout else {
            return this.inner.poll_write_vectored(cx, bufs);
        };
        if *this.closed {
            return Poll::Ready(Err(closed()));
        }

        let inner = this.inner;
        poll_with_deadline(this.write, timeout, "write", cx, |cx| {
            inner.poll_write_vectored(cx, bufs)
        })
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let Some(timeout) = *this.timeout else {
            return this.inner.poll_flush(cx);
        };
        if *this.closed {
            return Poll::Ready(Err(closed()));
        }

        let inner = this.inner;
        poll_with_deadline(this.write, timeout, "flush", cx, |cx| inner.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let result = this.inner.poll_shutdown(cx);
        if let Poll::Ready(Ok(())) = result {
            *this.closed = true;
        }
        result
    }
}
