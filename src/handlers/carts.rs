use crate::{
    auth::CustomerIdentity,
    errors::ServiceError,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item))
        .route("/items/:product_id", put(update_item).delete(remove_item))
        .route("/clear", post(clear_cart))
        .route("/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/gift-wrap", put(set_gift_wrap))
}

async fn get_cart(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state
        .services
        .carts
        .view(identity.customer_id, identity.customer_kind)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    quantity: i32,
}

async fn add_item(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let view = state
        .services
        .carts
        .add_item(
            identity.customer_id,
            identity.customer_kind,
            payload.product_id,
            payload.quantity,
        )
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateItemRequest {
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    quantity: i32,
}

async fn update_item(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let view = state
        .services
        .carts
        .update_item(
            identity.customer_id,
            identity.customer_kind,
            product_id,
            payload.quantity,
        )
        .await?;
    Ok(Json(view))
}

async fn remove_item(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state
        .services
        .carts
        .remove_item(identity.customer_id, identity.customer_kind, product_id)
        .await?;
    Ok(Json(view))
}

async fn clear_cart(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .carts
        .clear(identity.customer_id, identity.customer_kind)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Coupon code is required"))]
    code: String,
}

async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let (coupon, cart) = state
        .services
        .carts
        .apply_coupon(
            identity.customer_id,
            identity.customer_kind,
            payload.code.trim(),
        )
        .await?;
    Ok(Json(serde_json::json!({
        "coupon": {
            "code": coupon.code,
            "discount_type": coupon.discount_type,
            "discount_value": coupon.discount_value,
        },
        "pricing": cart.pricing,
        "cart": cart,
    })))
}

async fn remove_coupon(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state
        .services
        .carts
        .remove_coupon(identity.customer_id, identity.customer_kind)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct GiftWrapRequest {
    gift_wrap: bool,
}

async fn set_gift_wrap(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Json(payload): Json<GiftWrapRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state
        .services
        .carts
        .set_gift_wrap(
            identity.customer_id,
            identity.customer_kind,
            payload.gift_wrap,
        )
        .await?;
    Ok(Json(view))
}
