//! Client-observed timestamps of one HTTP exchange.
//!
//! DNS and connect instants are stamped by the transport around the resolver
//! and dial calls. The request-written and first-byte instants come from
//! [`TracedIo`], a thin wrapper around the connection stream that watches the
//! bytes going out and coming back.
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::result::Phases;

/// Timestamps observed during one hop of an attempt.
#[derive(Clone, Copy, Debug)]
pub struct Trace {
    /// When the hop began.
    pub start: Instant,
    /// Host resolution started.
    pub dns_start: Option<Instant>,
    /// Host resolution finished.
    pub dns_done: Option<Instant>,
    /// Dialing started.
    pub connect_start: Option<Instant>,
    /// TCP, TLS and HTTP handshakes finished.
    pub connect_done: Option<Instant>,
    /// The last request byte was handed to the socket.
    pub wrote_request: Option<Instant>,
    /// The first response byte was read.
    pub first_byte: Option<Instant>,
    /// The response body was fully read.
    pub done: Option<Instant>,
    /// The exchange ran over a pooled connection.
    pub reused: bool,
}

impl Trace {
    /// Starts a trace at `start` with no events recorded.
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            dns_start: None,
            dns_done: None,
            connect_start: None,
            connect_done: None,
            wrote_request: None,
            first_byte: None,
            done: None,
            reused: false,
        }
    }

    /// Forgets the previous hop before following a redirect.
    pub(crate) fn next_hop(&mut self) {
        *self = Self::new(Instant::now());
    }

    /// Derives phase durations from the recorded instants.
    pub fn phases(&self) -> Phases {
        Phases {
            dns: between(self.dns_start, self.dns_done),
            connect: between(self.connect_start, self.connect_done),
            request: between(Some(self.connect_done.unwrap_or(self.start)), self.wrote_request),
            server: between(self.wrote_request, self.first_byte),
            response: between(self.first_byte, self.done),
        }
    }
}

fn between(from: Option<Instant>, to: Option<Instant>) -> Option<Duration> {
    to?.checked_duration_since(from?)
}

#[derive(Clone, Copy, Debug, Default)]
struct MarkState {
    last_write: Option<Instant>,
    first_read: Option<Instant>,
}

/// Write/read instants of the exchange currently running on a connection.
#[derive(Debug, Default)]
pub(crate) struct IoMarks {
    state: Mutex<MarkState>,
}

impl IoMarks {
    /// Clears the marks before a new exchange on the same connection.
    pub fn reset(&self) {
        *self.state.lock() = MarkState::default();
    }

    /// Returns `(request written, first response byte)`.
    pub fn snapshot(&self) -> (Option<Instant>, Option<Instant>) {
        let state = self.state.lock();
        (state.last_write, state.first_read)
    }

    fn wrote(&self) {
        let mut state = self.state.lock();
        // writes after the response started belong to no request phase
        if state.first_read.is_none() {
            state.last_write = Some(Instant::now());
        }
    }

    fn read(&self) {
        let mut state = self.state.lock();
        if state.first_read.is_none() {
            state.first_read = Some(Instant::now());
        }
    }
}

/// A stream wrapper stamping [`IoMarks`] on successful reads and writes.
pub(crate) struct TracedIo<S> {
    inner: S,
    marks: Arc<IoMarks>,
}

impl<S> TracedIo<S> {
    pub fn new(inner: S, marks: Arc<IoMarks>) -> Self {
        Self { inner, marks }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TracedIo<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll
            && buf.filled().len() > before
        {
            this.marks.read();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TracedIo<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll
            && *n > 0
        {
            this.marks.wrote();
        }
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = &poll
            && *n > 0
        {
            this.marks.wrote();
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
