use crate::{entities::customer::CustomerKind, errors::ServiceError};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";
pub const CUSTOMER_KIND_HEADER: &str = "x-customer-kind";
pub const PARTNER_ID_HEADER: &str = "x-partner-id";

/// Caller identity as asserted by the upstream auth gateway. Requests that
/// reach this service without the headers were not authenticated.
#[derive(Debug, Clone, Copy)]
pub struct CustomerIdentity {
    pub customer_id: Uuid,
    pub customer_kind: CustomerKind,
}

#[derive(Debug, Clone, Copy)]
pub struct PartnerIdentity {
    pub partner_id: Uuid,
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, ServiceError> {
    let raw = parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized(format!("Missing {name} header")))?;
    Uuid::parse_str(raw).map_err(|_| ServiceError::Unauthorized(format!("Invalid {name} header")))
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CustomerIdentity {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let customer_id = header_uuid(parts, CUSTOMER_ID_HEADER)?;
        let customer_kind = match parts
            .headers
            .get(CUSTOMER_KIND_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            None | Some("customer") => CustomerKind::Customer,
            Some("business") => CustomerKind::Business,
            Some(other) => {
                return Err(ServiceError::Unauthorized(format!(
                    "Unknown customer kind {other}"
                )))
            }
        };
        Ok(CustomerIdentity {
            customer_id,
            customer_kind,
        })
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for PartnerIdentity {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(PartnerIdentity {
            partner_id: header_uuid(parts, PARTNER_ID_HEADER)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let mut parts = parts_with(&[]);
        let result = CustomerIdentity::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn kind_defaults_to_customer() {
        let id = Uuid::new_v4();
        let mut parts = parts_with(&[(CUSTOMER_ID_HEADER, &id.to_string())]);
        let identity = CustomerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(identity.customer_id, id);
        assert_eq!(identity.customer_kind, CustomerKind::Customer);
    }

    #[tokio::test]
    async fn business_kind_parsed() {
        let id = Uuid::new_v4();
        let mut parts = parts_with(&[
            (CUSTOMER_ID_HEADER, &id.to_string()),
            (CUSTOMER_KIND_HEADER, "business"),
        ]);
        let identity = CustomerIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(identity.customer_kind, CustomerKind::Business);
    }

    #[tokio::test]
    async fn unknown_kind_rejected() {
        let id = Uuid::new_v4();
        let mut parts = parts_with(&[
            (CUSTOMER_ID_HEADER, &id.to_string()),
            (CUSTOMER_KIND_HEADER, "wholesale"),
        ]);
        let result = CustomerIdentity::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }
}
