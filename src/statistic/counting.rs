//! Byte-counting socket wrapper (spec.md §4.9): observes bytes read/written on any
//! `AsyncRead + AsyncWrite` stream into a pair of shared atomic counters, generalizing the
//! teacher's `TrackedProxyConnection` (`tunnel/mod.rs`) from "count an outbound proxy
//! connection's bytes" to "count any stream's bytes, raw TCP socket included".

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// Wraps `inner`, adding every byte read into `rx` and every byte written into `tx`.
    pub struct CountingStream<S> {
        #[pin]
        inner: S,
        rx: Arc<AtomicU64>,
        tx: Arc<AtomicU64>,
    }
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, rx: Arc<AtomicU64>, tx: Arc<AtomicU64>) -> Self {
        Self { inner, rx, tx }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead> AsyncRead for CountingStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let res = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &res {
            let n = buf.filled().len() - before;
            if n > 0 {
                this.rx.fetch_add(n as u64, Ordering::Relaxed);
            }
        }
        res
    }
}

impl<S: AsyncWrite> AsyncWrite for CountingStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        let res = this.inner.poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &res {
            this.tx.fetch_add(*n as u64, Ordering::Relaxed);
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn counts_read_and_write_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let rx = Arc::new(AtomicU64::new(0));
        let tx = Arc::new(AtomicU64::new(0));
        let mut counted = CountingStream::new(client, rx.clone(), tx.clone());

        server.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        counted.read_exact(&mut buf).await.unwrap();
        assert_eq!(rx.load(Ordering::Relaxed), 5);

        counted.write_all(b"world!").await.unwrap();
        assert_eq!(tx.load(Ordering::Relaxed), 6);
    }
}
