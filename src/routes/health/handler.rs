use axum::{extract::State, response::IntoResponse};
use chrono::Utc;

use crate::{AppState, utils::success_to_api_response};

use super::model::HealthResponse;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_up = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(store = state.store.name(), "Health check ping failed: {}", e);
            false
        }
    };

    success_to_api_response(HealthResponse {
        status: if store_up { "ok" } else { "degraded" }.to_string(),
        store: state.store.name().to_string(),
        store_up,
        timestamp: Utc::now(),
    })
}
