use crate::{
    auth::PartnerIdentity,
    entities::order::OrderStatus,
    errors::ServiceError,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/status", put(update_status))
        .route("/location", put(report_location))
        .route("/availability", put(set_availability))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    partner_id: Uuid,
}

/// Dispatcher endpoint: hands a pending order to an available partner.
async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .delivery
        .assign(order_id, payload.partner_id)
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: OrderStatus,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    identity: PartnerIdentity,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .delivery
        .partner_update_status(order_id, identity.partner_id, payload.status)
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct LocationRequest {
    latitude: f64,
    longitude: f64,
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    identity: PartnerIdentity,
    Json(payload): Json<LocationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let notified = state
        .services
        .delivery
        .report_location(identity.partner_id, payload.latitude, payload.longitude)
        .await?;
    Ok(Json(serde_json::json!({ "orders_notified": notified })))
}

#[derive(Debug, Deserialize)]
struct AvailabilityRequest {
    is_available: bool,
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    identity: PartnerIdentity,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let partner = state
        .services
        .delivery
        .set_availability(identity.partner_id, payload.is_available)
        .await?;
    Ok(Json(partner))
}
