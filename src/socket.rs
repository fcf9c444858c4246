//! Byte-level socket activity tracking and idle-timeout registration.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::sleep;

/// Shared view of one underlying socket.
///
/// The stream wrapper stamps activity, the executor registers idle timeouts,
/// and the agent keeps the state alive while the socket sits in the pool.
#[derive(Debug)]
pub(crate) struct SocketState {
    opened_at: Instant,
    last_activity_us: AtomicU64,
    idle_timeout_listeners: AtomicUsize,
}

impl SocketState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            opened_at: Instant::now(),
            last_activity_us: AtomicU64::new(0),
            idle_timeout_listeners: AtomicUsize::new(0),
        })
    }

    pub(crate) fn touch(&self) {
        let now_us = self.opened_at.elapsed().as_micros() as u64;
        self.last_activity_us.fetch_max(now_us, Ordering::AcqRel);
    }

    pub(crate) fn idle_for(&self) -> Duration {
        let last_activity = Duration::from_micros(self.last_activity_us.load(Ordering::Acquire));
        self.opened_at.elapsed().saturating_sub(last_activity)
    }

    pub(crate) fn idle_timeout_listeners(&self) -> usize {
        self.idle_timeout_listeners.load(Ordering::Acquire)
    }

    /// Arms an idle timeout on this socket, restarting its idle clock.
    pub(crate) fn set_timeout(self: &Arc<Self>, timeout: Duration) -> IdleTimeout {
        self.touch();
        self.idle_timeout_listeners.fetch_add(1, Ordering::AcqRel);
        IdleTimeout {
            socket: Arc::clone(self),
            timeout,
        }
    }
}

/// One registered idle-timeout listener; unregisters on drop.
#[derive(Debug)]
pub(crate) struct IdleTimeout {
    socket: Arc<SocketState>,
    timeout: Duration,
}

impl IdleTimeout {
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves once the socket has seen no traffic for the full timeout.
    pub(crate) async fn expired(&self) {
        loop {
            let idle = self.socket.idle_for();
            if idle >= self.timeout {
                return;
            }
            sleep(self.timeout - idle).await;
        }
    }
}

impl Drop for IdleTimeout {
    fn drop(&mut self) {
        self.socket
            .idle_timeout_listeners
            .fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub(crate) struct ActivityStream<S> {
    inner: S,
    state: Arc<SocketState>,
}

impl<S> ActivityStream<S> {
    pub(crate) fn new(inner: S, state: Arc<SocketState>) -> Self {
        Self { inner, state }
    }
}

impl<S> AsyncRead for ActivityStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let filled_before = buf.filled().len();
        let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > filled_before {
            this.state.touch();
        }
        polled
    }
}

impl<S> AsyncWrite for ActivityStream<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &polled
            && *written > 0
        {
            this.state.touch();
        }
        polled
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(written)) = &polled
            && *written > 0
        {
            this.state.touch();
        }
        polled
    }
}
