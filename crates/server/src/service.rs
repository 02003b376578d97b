use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use gatehouse_admin::SharedState;
use http::StatusCode;
use tracing::debug;

use crate::dispatch::{not_found, Dispatcher, RequestHead};
use crate::listener::ClientAddr;

/// State shared by every request handler.
#[derive(Clone)]
pub struct ServiceState {
    pub dispatcher: Arc<ArcSwap<Dispatcher>>,
    pub shared: SharedState,
}

/// Per-endpoint facts handed to the handlers.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub tls: bool,
}

/// Every request passes request admission and is then dispatched by host
/// and path; there are no fixed routes.
pub fn router(state: ServiceState, endpoint: Endpoint) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(middleware::from_fn_with_state(state.clone(), admit_request))
        .layer(Extension(endpoint))
        .with_state(state)
}

async fn admit_request(State(state): State<ServiceState>, request: Request, next: Next) -> Response {
    let metrics = &state.shared.metrics;
    metrics.requests_total.inc();

    if !state.shared.limiter.admit_request().await {
        metrics.requests_denied.inc();
        debug!(uri = %request.uri(), "request denied by rate limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "request rate limit exceeded\n").into_response();
    }

    next.run(request).await
}

async fn handle_request(
    State(state): State<ServiceState>,
    Extension(endpoint): Extension<Endpoint>,
    ConnectInfo(ClientAddr(client)): ConnectInfo<ClientAddr>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let (parts, _body) = request.into_parts();

    let head = RequestHead {
        method: &parts.method,
        uri: &parts.uri,
        headers: &parts.headers,
        client,
        tls: endpoint.tls,
    };

    let metrics = &state.shared.metrics;
    let response = match state.dispatcher.load().dispatch(&head) {
        Some(response) => response,
        None => {
            metrics.requests_not_found.inc();
            not_found()
        }
    };

    metrics
        .request_duration
        .with_label_values(&[parts.method.as_str(), response.status().as_str()])
        .observe(started.elapsed().as_secs_f64());

    response
}
