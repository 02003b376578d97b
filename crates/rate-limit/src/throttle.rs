use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::token_bucket::{Grant, TokenBucket};

type GrantFuture = Pin<Box<dyn Future<Output = Grant> + Send>>;

/// A byte stream whose writes are metered by a data [`TokenBucket`].
///
/// Reads pass straight through. Each write first obtains a grant for the
/// bytes it is about to send; a denied grant fails the write with
/// [`io::ErrorKind::ConnectionAborted`]. Without a bucket the wrapper is a
/// plain passthrough.
pub struct ThrottledStream<S> {
    inner: S,
    bucket: Option<TokenBucket>,
    pending: Option<GrantFuture>,
    /// Bytes granted but not yet written.
    credit: usize,
}

impl<S> ThrottledStream<S> {
    pub fn new(inner: S, bucket: Option<TokenBucket>) -> Self {
        Self {
            inner,
            bucket,
            pending: None,
            credit: 0,
        }
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

    pub fn is_throttled(&self) -> bool {
        self.bucket.is_some()
    }
}

/// Largest single request a write may make against `bucket`.
fn max_request(bucket: &TokenBucket, wanted: usize) -> usize {
    if bucket.partial_tokens() {
        wanted
    } else {
        let atomic_limit = (bucket.capacity().floor() as usize).max(1);
        wanted.min(atomic_limit)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ThrottledStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ThrottledStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let bucket = match &this.bucket {
            Some(bucket) if !buf.is_empty() => bucket,
            _ => return Pin::new(&mut this.inner).poll_write(cx, buf),
        };

        loop {
            if this.credit > 0 {
                let len = this.credit.min(buf.len());
                return match Pin::new(&mut this.inner).poll_write(cx, &buf[..len]) {
                    Poll::Ready(Ok(written)) => {
                        this.credit -= written.min(this.credit);
                        Poll::Ready(Ok(written))
                    }
                    other => other,
                };
            }

            let grant = this.pending.get_or_insert_with(|| {
                let bucket = bucket.clone();
                let amount = max_request(&bucket, buf.len());
                Box::pin(async move { bucket.request_grant(amount as f64).await })
            });

            match grant.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(grant) => {
                    this.pending = None;
                    if !grant.granted {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "outbound data grant denied",
                        )));
                    }
                    this.credit += grant.amount as usize;
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_common::{BucketConfig, FlowRate};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::Instant;

    fn bucket(capacity: f64, per_second: f64) -> TokenBucket {
        TokenBucket::new(&BucketConfig::new(
            FlowRate::per_second(per_second).unwrap(),
            capacity,
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_passthrough_without_bucket() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = ThrottledStream::new(client, None);
        assert!(!stream.is_throttled());

        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_wait_for_grants() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = ThrottledStream::new(client, Some(bucket(4.0, 1.0)));

        let started = Instant::now();
        stream.write_all(b"12345678").await.unwrap();
        // Four bytes of burst, then one byte per second for the rest.
        assert!(started.elapsed() >= Duration::from_secs(4));

        let mut buf = [0u8; 8];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"12345678");
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_grant_aborts_write() {
        let data = bucket(2.0, 1.0);
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = ThrottledStream::new(client, Some(data.clone()));

        data.deny_all_requests();
        let err = stream.write_all(b"abc").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
