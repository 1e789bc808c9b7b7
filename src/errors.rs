use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error payload returned to clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Human-readable message, safe to display verbatim for 4xx responses
    pub message: String,
    /// Machine-readable reason code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Typed reasons a coupon can be rejected. Each maps to a stable reason code
/// and a message safe to show to the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    NotFound,
    Inactive,
    NotYetValid,
    Expired,
    LimitReached,
    PerUserLimitReached,
    FirstOrderOnly,
    NotApplicable,
    MinOrderNotMet,
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "coupon_not_found",
            Self::Inactive => "coupon_inactive",
            Self::NotYetValid => "coupon_not_yet_valid",
            Self::Expired => "coupon_expired",
            Self::LimitReached => "coupon_limit_reached",
            Self::PerUserLimitReached => "coupon_per_user_limit_reached",
            Self::FirstOrderOnly => "coupon_first_order_only",
            Self::NotApplicable => "coupon_not_applicable",
            Self::MinOrderNotMet => "coupon_min_order_not_met",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "Coupon code does not exist",
            Self::Inactive => "This coupon is no longer active",
            Self::NotYetValid => "This coupon is not valid yet",
            Self::Expired => "This coupon has expired",
            Self::LimitReached => "This coupon has reached its usage limit",
            Self::PerUserLimitReached => "You have already used this coupon",
            Self::FirstOrderOnly => "This coupon is valid on your first order only",
            Self::NotApplicable => "This coupon does not apply to the items in your cart",
            Self::MinOrderNotMet => "Your order does not meet the coupon's minimum amount",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}")]
    InsufficientStock {
        product_id: uuid::Uuid,
        requested: i32,
    },

    #[error("{0}")]
    CouponRejected(CouponRejection),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Payment gateway error: {0}")]
    PaymentFailed(String),

    #[error("Payment signature verification failed")]
    SignatureInvalid,

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::CouponRejected(_)
            | Self::EmptyCart
            | Self::SignatureInvalid => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::InsufficientStock { .. } | Self::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            Self::PaymentFailed(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable reason code, where one exists.
    pub fn reason_code(&self) -> Option<String> {
        match self {
            Self::CouponRejected(rejection) => Some(rejection.code().to_string()),
            Self::InsufficientStock { .. } => Some("insufficient_stock".to_string()),
            Self::InvalidTransition { .. } => Some("invalid_transition".to_string()),
            Self::EmptyCart => Some("empty_cart".to_string()),
            Self::SignatureInvalid => Some("signature_invalid".to_string()),
            Self::PaymentFailed(_) => Some("payment_gateway_error".to_string()),
            _ => None,
        }
    }

    /// Message suitable for the HTTP response body. Internal errors return
    /// generic text; details stay in server-side logs.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if matches!(self, ServiceError::SignatureInvalid) {
            tracing::warn!(security = true, "payment signature verification failed");
        }
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.reason_code(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
