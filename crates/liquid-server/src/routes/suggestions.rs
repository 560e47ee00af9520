use crate::configuration::SuggestedAction;
use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};

async fn handler(State(state): State<AppState>) -> Json<Vec<SuggestedAction>> {
    Json(state.suggestions.as_ref().clone())
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/suggestions", get(handler))
        .with_state(state)
}
