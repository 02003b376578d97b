pub mod routes;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use gatehouse_common::AppConfig;
use gatehouse_rate_limit::RateLimiter;
use tower_http::cors::{Any, CorsLayer};

pub use state::{
    AppState, ConfigReloader, HostListing, MountListing, ReloadFuture, Reloaded, RouteListing,
    ServerMetrics, SharedState,
};

/// Build the Axum router with all admin API routes and middleware.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(routes::health::health_check))
        // Prometheus metrics
        .route("/api/metrics", get(routes::metrics::get_metrics))
        // Traffic statistics
        .route("/api/stats", get(routes::stats::get_stats))
        // Rate limit bucket snapshots
        .route("/api/limits", get(routes::limits::get_limits))
        // Host, mount and certificate bindings
        .route("/api/routes", get(routes::listing::list_routes))
        // Configuration
        .route("/api/config", get(routes::config::get_config))
        .route("/api/reload", post(routes::config::reload_config))
        .with_state(state)
        .layer(cors)
}

/// Serve the admin API on `listen_addr` until `shutdown` resolves.
pub async fn run_admin_server<F>(
    state: SharedState,
    listen_addr: &str,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("admin API server listening on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Convenience function to create a SharedState without a reloader.
pub fn new_shared_state(
    config: AppConfig,
    routes: RouteListing,
    limiter: RateLimiter,
) -> anyhow::Result<SharedState> {
    Ok(Arc::new(AppState::new(config, routes, limiter, None)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use gatehouse_common::{BucketConfig, FlowRate, RateLimitConfig};

    const CONFIG: &str = r#"
server:
  listen:
    - addr: "127.0.0.1:8080"
hosts:
  - names: ["*"]
    mounts:
      - path: /*
        app: hello
applications:
  - name: hello
    kind: text
    body: hi
"#;

    fn listing(app: &str) -> RouteListing {
        RouteListing {
            hosts: vec![HostListing {
                pattern: "*".to_string(),
                mounts: vec![MountListing {
                    path: "/*".to_string(),
                    app: app.to_string(),
                }],
            }],
            certificates: Vec::new(),
        }
    }

    fn state_with(limiter: RateLimiter, reloader: Option<Arc<dyn ConfigReloader>>) -> SharedState {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        Arc::new(AppState::new(config, listing("hello"), limiter, reloader).unwrap())
    }

    struct FixedReloader;

    impl ConfigReloader for FixedReloader {
        fn reload(&self) -> ReloadFuture<'_> {
            Box::pin(async {
                Ok::<_, anyhow::Error>(Reloaded {
                    config: AppConfig::from_yaml(CONFIG)?,
                    routes: listing("goodbye"),
                })
            })
        }
    }

    struct FailingReloader;

    impl ConfigReloader for FailingReloader {
        fn reload(&self) -> ReloadFuture<'_> {
            Box::pin(async { Err::<Reloaded, _>(anyhow::anyhow!("bad yaml")) })
        }
    }

    #[tokio::test]
    async fn test_health_reports_healthy() {
        let state = state_with(RateLimiter::unlimited(), None);
        let body = routes::health::health_check(State(state)).await.0;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_limits_list_configured_buckets() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            requests: Some(BucketConfig::new(FlowRate::per_second(5.0).unwrap(), 10.0)),
            ..Default::default()
        })
        .unwrap();
        let state = state_with(limiter, None);

        let body = routes::limits::get_limits(State(state)).await.0;
        let buckets = body.as_object().unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(body["requests"]["capacity"], 10.0);
        assert_eq!(body["requests"]["waiters"], 0);
    }

    #[tokio::test]
    async fn test_metrics_include_bucket_gauges() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            connections: Some(BucketConfig::new(FlowRate::per_second(1.0).unwrap(), 3.0)),
            ..Default::default()
        })
        .unwrap();
        let state = state_with(limiter, None);
        state.metrics.requests_total.inc();

        let response = routes::metrics::get_metrics(State(state.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let names: Vec<String> = state
            .metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"gatehouse_requests_total".to_string()));
        assert!(names.contains(&"gatehouse_bucket_available_burst".to_string()));
    }

    #[tokio::test]
    async fn test_reload_swaps_listing() {
        let state = state_with(RateLimiter::unlimited(), Some(Arc::new(FixedReloader)));

        let response = routes::config::reload_config(State(state.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let routes = routes::listing::list_routes(State(state)).await.0;
        assert_eq!(routes.hosts[0].mounts[0].app, "goodbye");
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_listing() {
        let state = state_with(RateLimiter::unlimited(), Some(Arc::new(FailingReloader)));

        let response = routes::config::reload_config(State(state.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.routes.load().hosts[0].mounts[0].app, "hello");
    }

    #[tokio::test]
    async fn test_reload_without_reloader_is_not_implemented() {
        let state = state_with(RateLimiter::unlimited(), None);
        let response = routes::config::reload_config(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_config_round_trips_as_json() {
        let state = state_with(RateLimiter::unlimited(), None);
        let response = routes::config::get_config(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
