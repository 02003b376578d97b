use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use gatehouse_common::AppConfig;
use gatehouse_rate_limit::RateLimiter;
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntGaugeVec, Opts, Registry,
};
use serde::Serialize;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Boxed future returned by [`ConfigReloader::reload`].
pub type ReloadFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Reloaded>> + Send + 'a>>;

/// Re-reads the configuration and swaps the live routing tables.
///
/// Implemented by the server binary; the admin API only triggers it.
pub trait ConfigReloader: Send + Sync {
    fn reload(&self) -> ReloadFuture<'_>;
}

/// The outcome of a successful reload.
pub struct Reloaded {
    pub config: AppConfig,
    pub routes: RouteListing,
}

/// Canonical text of every binding the server is routing on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteListing {
    pub hosts: Vec<HostListing>,
    /// Certificate hostname patterns.
    pub certificates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostListing {
    pub pattern: String,
    pub mounts: Vec<MountListing>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MountListing {
    pub path: String,
    pub app: String,
}

/// Central application state shared between the server and the admin API.
pub struct AppState {
    pub config: ArcSwap<AppConfig>,
    pub routes: ArcSwap<RouteListing>,
    pub metrics: ServerMetrics,
    pub limiter: RateLimiter,
    pub reloader: Option<Arc<dyn ConfigReloader>>,
    pub start_time: std::time::Instant,
    pub started_at: DateTime<Utc>,
}

/// Prometheus metrics collected by the server.
pub struct ServerMetrics {
    pub registry: Registry,
    pub connections_admitted: IntCounter,
    pub connections_denied: IntCounter,
    pub requests_total: IntCounter,
    pub requests_denied: IntCounter,
    pub requests_not_found: IntCounter,
    pub request_duration: HistogramVec,
    pub bucket_available: GaugeVec,
    pub bucket_waiters: IntGaugeVec,
}

impl ServerMetrics {
    /// Create every counter and register it against a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_admitted = IntCounter::with_opts(Opts::new(
            "gatehouse_connections_admitted_total",
            "Connections admitted by the connection bucket",
        ))?;
        let connections_denied = IntCounter::with_opts(Opts::new(
            "gatehouse_connections_denied_total",
            "Connections closed because the connection bucket denied them",
        ))?;
        let requests_total = IntCounter::with_opts(Opts::new(
            "gatehouse_requests_total",
            "Total number of requests received",
        ))?;
        let requests_denied = IntCounter::with_opts(Opts::new(
            "gatehouse_requests_denied_total",
            "Requests answered with 503 by the request bucket",
        ))?;
        let requests_not_found = IntCounter::with_opts(Opts::new(
            "gatehouse_requests_not_found_total",
            "Requests no application accepted",
        ))?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gatehouse_request_duration_seconds",
                "Request handling duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["method", "status"],
        )?;
        let bucket_available = GaugeVec::new(
            Opts::new(
                "gatehouse_bucket_available_burst",
                "Units currently available in each rate limit bucket",
            ),
            &["bucket"],
        )?;
        let bucket_waiters = IntGaugeVec::new(
            Opts::new(
                "gatehouse_bucket_waiters",
                "Requests queued on each rate limit bucket",
            ),
            &["bucket"],
        )?;

        registry.register(Box::new(connections_admitted.clone()))?;
        registry.register(Box::new(connections_denied.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_denied.clone()))?;
        registry.register(Box::new(requests_not_found.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(bucket_available.clone()))?;
        registry.register(Box::new(bucket_waiters.clone()))?;

        Ok(Self {
            registry,
            connections_admitted,
            connections_denied,
            requests_total,
            requests_denied,
            requests_not_found,
            request_duration,
            bucket_available,
            bucket_waiters,
        })
    }

    /// Copy the limiter's bucket snapshots into the bucket gauges.
    pub fn observe_limiter(&self, limiter: &RateLimiter) {
        for (name, snapshot) in limiter.snapshots() {
            self.bucket_available
                .with_label_values(&[name])
                .set(snapshot.available_burst);
            self.bucket_waiters
                .with_label_values(&[name])
                .set(snapshot.waiter_count as i64);
        }
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        routes: RouteListing,
        limiter: RateLimiter,
        reloader: Option<Arc<dyn ConfigReloader>>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            routes: ArcSwap::from_pointee(routes),
            metrics: ServerMetrics::new()?,
            limiter,
            reloader,
            start_time: std::time::Instant::now(),
            started_at: Utc::now(),
        })
    }
}
