use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;

use crate::{database, AppState};

pub mod automation;

pub use automation::automation_routes;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/automation", automation_routes())
        .with_state(state)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = database::health_check(&state.db_pool).await;
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database_ok { "healthy" } else { "degraded" },
            "service": "openoms-automation",
            "database": database_ok,
            "automation_in_flight": state.automation.tasks().in_flight(),
            "webhooks_in_flight": state.webhooks.tasks().in_flight(),
        })),
    )
}
