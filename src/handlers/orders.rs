use crate::{
    auth::CustomerIdentity,
    entities::order::PaymentMethod,
    errors::ServiceError,
    services::orders::NewOrder,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/track", get(track_order))
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    delivery_address: serde_json::Value,
    payment_method: PaymentMethod,
    gift_wrap: Option<bool>,
}

/// Cash-on-delivery checkout. Online payments settle through
/// `POST /payments/verify` instead, where the proof is checked first.
async fn create_order(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    if payload.payment_method == PaymentMethod::Online {
        return Err(ServiceError::ValidationError(
            "Online payments must go through payment verification".into(),
        ));
    }

    let order = state
        .services
        .orders
        .create_from_cart(
            identity.customer_id,
            identity.customer_kind,
            NewOrder {
                delivery_address: payload.delivery_address,
                payment_method: payload.payment_method,
                gift_wrap: payload.gift_wrap,
                payment: None,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .list_for(identity.customer_id, identity.customer_kind)
        .await?;
    Ok(Json(orders))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_for(order_id, identity.customer_id, identity.customer_kind)
        .await?;
    let items = state.services.orders.items(order_id).await?;
    Ok(Json(serde_json::json!({ "order": order, "items": items })))
}

#[derive(Debug, Deserialize)]
struct CancelOrderRequest {
    reason: Option<String>,
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    // Ownership first so another customer's order reads as missing.
    let order = state
        .services
        .orders
        .get_for(order_id, identity.customer_id, identity.customer_kind)
        .await?;

    // A captured payment goes back through the refund path, which refunds at
    // the gateway before cancelling locally. A gateway failure leaves the
    // order cancellable so the customer can retry; it also re-drives a refund
    // that previously failed after the order was already cancelled.
    let final_order =
        if order.payment_status == crate::entities::order::PaymentStatus::Success {
            state
                .services
                .payments
                .refund_order(order.id, payload.reason, "customer")
                .await?
        } else {
            state
                .services
                .orders
                .cancel(order.id, payload.reason, "customer")
                .await?
        };
    Ok(Json(final_order))
}

async fn track_order(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .orders
        .get_for(order_id, identity.customer_id, identity.customer_kind)
        .await?;
    let tracking = state.services.orders.tracking(order_id).await?;
    Ok(Json(tracking))
}
