use axum::extract::State;
use axum::Json;

use crate::state::{RouteListing, SharedState};

/// GET /api/routes
///
/// Lists the host patterns, their path mounts and the certificate names the
/// server is currently routing on.
pub async fn list_routes(State(state): State<SharedState>) -> Json<RouteListing> {
    Json(RouteListing::clone(&state.routes.load()))
}
