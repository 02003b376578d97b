use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::SharedState;

/// GET /api/config
///
/// Returns the running configuration as JSON.
pub async fn get_config(State(state): State<SharedState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(serde_json::to_value(&**config).unwrap_or(json!({"error": "serialization failed"})))
}

/// POST /api/reload
///
/// Re-reads the configuration file and swaps the host, path and certificate
/// tables. Listeners and rate limit buckets are kept as they are. A failed
/// reload leaves the running tables untouched.
pub async fn reload_config(State(state): State<SharedState>) -> impl IntoResponse {
    let Some(reloader) = state.reloader.clone() else {
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({
                "status": "error",
                "message": "reload is not available"
            })),
        );
    };

    match reloader.reload().await {
        Ok(reloaded) => {
            let hosts = reloaded.routes.hosts.len();
            state.config.store(reloaded.config.into());
            state.routes.store(reloaded.routes.into());

            tracing::info!(hosts, "configuration reloaded via admin API");

            (
                StatusCode::OK,
                Json(json!({
                    "status": "reloaded",
                    "hosts": hosts
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "configuration reload failed");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "status": "error",
                    "message": format!("reload failed: {:#}", e)
                })),
            )
        }
    }
}
