use axum::extract::State;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::state::SharedState;

/// GET /api/limits
///
/// Returns a snapshot of every configured rate limit bucket. Unconfigured
/// buckets are omitted and admit everything.
pub async fn get_limits(State(state): State<SharedState>) -> Json<Value> {
    let mut buckets = Map::new();
    for (name, snapshot) in state.limiter.snapshots() {
        buckets.insert(
            name.to_string(),
            json!({
                "available_burst": snapshot.available_burst,
                "capacity": snapshot.capacity,
                "flow_rate_per_sec": snapshot.flow_rate,
                "waiters": snapshot.waiter_count,
                "max_waiters": snapshot.max_waiters,
                "partial_tokens": snapshot.partial_tokens,
            }),
        );
    }

    Json(Value::Object(buckets))
}
