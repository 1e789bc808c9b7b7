use crate::{
    auth::CustomerIdentity,
    errors::ServiceError,
    handlers::payment_webhooks,
    services::payments::VerifyPaymentRequest,
    AppState,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create-order", post(create_gateway_order))
        .route("/verify", post(verify_payment))
        .route("/webhook", post(payment_webhooks::receive))
}

/// Registers a gateway order for the caller's current cart total. The client
/// completes the payment against the returned id, then calls `/verify`.
async fn create_gateway_order(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let intent = state
        .services
        .payments
        .create_intent(identity.customer_id, identity.customer_kind)
        .await?;
    Ok(Json(intent))
}

async fn verify_payment(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, created) = state
        .services
        .payments
        .verify_and_create_order(identity.customer_id, identity.customer_kind, payload)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(order)))
}
