//! Admission control for Gatehouse.
//!
//! This crate provides a continuous-time [`TokenBucket`] and a [`RateLimiter`]
//! facade that composes up to three of them:
//!
//! - **connections** -- one unit per accepted connection
//! - **requests** -- one unit per request on an admitted connection
//! - **data** -- one unit per outbound byte, applied through
//!   [`ThrottledStream`]
//!
//! Buckets refill lazily from elapsed time and queue callers that cannot be
//! served immediately in strict FIFO order. A denied grant is an ordinary
//! outcome, never an error, and shutdown resolves every waiter with a denial.

pub mod error;
pub mod throttle;
pub mod token_bucket;

use gatehouse_common::RateLimitConfig;

pub use error::BucketError;
pub use throttle::ThrottledStream;
pub use token_bucket::{BucketSnapshot, Grant, TokenBucket};

/// The connection, request and data buckets of one server.
///
/// Buckets that are not configured always admit. The limiter is cheaply
/// cloneable and clones share bucket state.
#[derive(Clone, Default)]
pub struct RateLimiter {
    connections: Option<TokenBucket>,
    requests: Option<TokenBucket>,
    data: Option<TokenBucket>,
}

impl RateLimiter {
    /// Build the configured buckets.
    pub fn new(config: &RateLimitConfig) -> Result<Self, BucketError> {
        let build = |name: &str, bucket: &Option<gatehouse_common::BucketConfig>| {
            bucket
                .as_ref()
                .map(|bucket| {
                    tracing::info!(bucket = name, "configuring rate limit bucket");
                    TokenBucket::new(bucket)
                })
                .transpose()
        };

        Ok(Self {
            connections: build("connections", &config.connections)?,
            requests: build("requests", &config.requests)?,
            data: build("data", &config.data)?,
        })
    }

    /// A limiter that admits everything.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Wait for a connection slot. `false` means the caller should close the
    /// connection.
    pub async fn admit_connection(&self) -> bool {
        admit(&self.connections).await
    }

    /// Wait for a request slot. `false` means the caller should answer with a
    /// resource-exhaustion response.
    pub async fn admit_request(&self) -> bool {
        admit(&self.requests).await
    }

    /// Meter writes on `stream` through the data bucket, if one is
    /// configured.
    pub fn wrap_outbound_stream<S>(&self, stream: S) -> ThrottledStream<S> {
        ThrottledStream::new(stream, self.data.clone())
    }

    /// Deny every waiter on every bucket and refuse later requests.
    pub fn shutdown(&self) {
        for (name, bucket) in self.buckets() {
            tracing::debug!(bucket = name, "shutting down rate limit bucket");
            bucket.deny_all_requests();
        }
    }

    /// Diagnostic snapshots of the configured buckets.
    pub fn snapshots(&self) -> Vec<(&'static str, BucketSnapshot)> {
        self.buckets()
            .map(|(name, bucket)| (name, bucket.snapshot_now()))
            .collect()
    }

    pub fn connections(&self) -> Option<&TokenBucket> {
        self.connections.as_ref()
    }

    pub fn requests(&self) -> Option<&TokenBucket> {
        self.requests.as_ref()
    }

    pub fn data(&self) -> Option<&TokenBucket> {
        self.data.as_ref()
    }

    fn buckets(&self) -> impl Iterator<Item = (&'static str, &TokenBucket)> + '_ {
        [
            ("connections", self.connections.as_ref()),
            ("requests", self.requests.as_ref()),
            ("data", self.data.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, bucket)| bucket.map(|bucket| (name, bucket)))
    }
}

async fn admit(bucket: &Option<TokenBucket>) -> bool {
    match bucket {
        Some(bucket) => bucket.request_grant(1.0).await.granted,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_common::{BucketConfig, FlowRate};

    fn limited(burst: f64, max_queue: usize) -> BucketConfig {
        BucketConfig {
            max_queue_size: Some(max_queue),
            ..BucketConfig::new(FlowRate::per_second(1.0).unwrap(), burst)
        }
    }

    #[tokio::test]
    async fn test_unconfigured_buckets_always_admit() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            assert!(limiter.admit_connection().await);
            assert!(limiter.admit_request().await);
        }
        assert!(limiter.snapshots().is_empty());
        assert!(!limiter.wrap_outbound_stream(()).is_throttled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_bucket_through_facade() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            connections: Some(limited(2.0, 0)),
            ..Default::default()
        })
        .unwrap();

        assert!(limiter.admit_connection().await);
        assert!(limiter.admit_connection().await);
        // Burst used up and no queueing allowed.
        assert!(!limiter.admit_connection().await);
        // The request bucket is independent and unconfigured.
        assert!(limiter.admit_request().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clone_shares_state() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            requests: Some(limited(1.0, 0)),
            ..Default::default()
        })
        .unwrap();
        let limiter2 = limiter.clone();

        assert!(limiter.admit_request().await);
        assert!(!limiter2.admit_request().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_denies_waiters() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            requests: Some(limited(1.0, 10)),
            data: Some(limited(10.0, 10)),
            ..Default::default()
        })
        .unwrap();
        assert!(limiter.admit_request().await);

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.admit_request().await })
        };
        tokio::task::yield_now().await;

        limiter.shutdown();
        assert!(!waiter.await.unwrap());

        let names: Vec<_> = limiter.snapshots().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["requests", "data"]);
        assert!(limiter.data().unwrap().is_closed());
    }
}
