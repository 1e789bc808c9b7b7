pub mod carts;
pub mod delivery;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod ws;

use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Full application router: versioned API, websocket endpoints, and health
/// endpoints.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .nest("/api/v1", api_v1_routes())
        .nest("/ws", ws::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/cart", carts::routes())
        .nest("/orders", orders::routes())
        .nest("/payments", payments::routes())
        .nest("/delivery", delivery::routes())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
    }))
}
