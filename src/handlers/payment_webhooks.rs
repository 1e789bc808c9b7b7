use crate::{errors::ServiceError, AppState};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Gateway webhook receiver. The body stays raw bytes until the signature
/// checks out; parsing untrusted JSON first would widen the attack surface
/// and break signature coverage.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServiceError::SignatureInvalid)?;

    let outcome = state
        .services
        .payments
        .handle_webhook(&body, signature)
        .await?;

    // Both processed and ignored events are acknowledged; the gateway only
    // redelivers on non-2xx, which is reserved for processing failures.
    Ok(Json(serde_json::json!({ "status": "ok", "outcome": format!("{outcome:?}").to_lowercase() })))
}
