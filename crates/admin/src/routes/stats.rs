use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::SharedState;

/// GET /api/stats
///
/// Returns aggregated traffic statistics derived from Prometheus counters
/// and the server's uptime.
pub async fn get_stats(State(state): State<SharedState>) -> Json<Value> {
    let uptime_secs = state.start_time.elapsed().as_secs();
    let metrics = &state.metrics;
    let total_requests = metrics.requests_total.get();
    let denied_requests = metrics.requests_denied.get();
    let not_found_requests = metrics.requests_not_found.get();

    let requests_per_second = if uptime_secs > 0 {
        total_requests as f64 / uptime_secs as f64
    } else {
        0.0
    };

    Json(json!({
        "connections_admitted": metrics.connections_admitted.get(),
        "connections_denied": metrics.connections_denied.get(),
        "total_requests": total_requests,
        "denied_requests": denied_requests,
        "not_found_requests": not_found_requests,
        "uptime_secs": uptime_secs,
        "requests_per_second": requests_per_second
    }))
}
