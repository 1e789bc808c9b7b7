use crate::{
    broadcast::{self, Broadcaster, ChannelMessage},
    config::GatewayConfig,
    entities::{
        customer::CustomerKind,
        order,
        order::{PaymentMethod, PaymentStatus},
        Order,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::CartService,
        orders::{NewOrder, OrderService, VerifiedPayment},
        pricing::PricingService,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

type HmacSha256 = Hmac<Sha256>;

/// Order registered with the payment gateway; the customer completes the
/// payment against this id on their device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub refund_id: String,
}

/// Seam to the external payment gateway. The HTTP implementation talks to
/// the real service; tests substitute a mock.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError>;

    /// Refunds a captured payment. `amount: None` refunds in full.
    async fn refund(
        &self,
        gateway_payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<GatewayRefund, ServiceError>;
}

/// Gateway client over HTTP with basic auth and a bounded timeout. Gateway
/// amounts are integers in minor currency units.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct GatewayRefundResponse {
    id: String,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let body = serde_json::json!({
            "amount": to_minor_units(amount)?,
            "currency": currency,
            "receipt": receipt,
        });

        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("gateway unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::PaymentFailed(format!(
                "gateway order creation returned {}",
                response.status()
            )));
        }

        let parsed: GatewayOrderResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("malformed gateway response: {e}")))?;
        Ok(GatewayOrder {
            gateway_order_id: parsed.id,
            amount: from_minor_units(parsed.amount),
            currency: parsed.currency,
        })
    }

    async fn refund(
        &self,
        gateway_payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<GatewayRefund, ServiceError> {
        let mut body = serde_json::Map::new();
        if let Some(amount) = amount {
            body.insert("amount".into(), to_minor_units(amount)?.into());
        }

        let response = self
            .client
            .post(format!(
                "{}/payments/{gateway_payment_id}/refund",
                self.base_url
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("gateway unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::PaymentFailed(format!(
                "gateway refund returned {}",
                response.status()
            )));
        }

        let parsed: GatewayRefundResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentFailed(format!("malformed gateway response: {e}")))?;
        Ok(GatewayRefund {
            refund_id: parsed.id,
        })
    }
}

fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {amount}")))
}

fn from_minor_units(minor: i64) -> Decimal {
    Decimal::from(minor) / Decimal::from(100)
}

/// HMAC-SHA256 over `payload`, hex-compared against `signature` in constant
/// time. Undecodable signatures fail the same way as wrong ones.
pub fn verify_signature(secret: &str, payload: &str, signature: &str) -> Result<(), ServiceError> {
    let decoded = hex::decode(signature).map_err(|_| ServiceError::SignatureInvalid)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {e}")))?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&decoded)
        .map_err(|_| ServiceError::SignatureInvalid)
}

fn verify_raw_signature(
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<(), ServiceError> {
    let decoded = hex::decode(signature).map_err(|_| ServiceError::SignatureInvalid)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {e}")))?;
    mac.update(payload);
    mac.verify_slice(&decoded)
        .map_err(|_| ServiceError::SignatureInvalid)
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
    pub delivery_address: serde_json::Value,
    pub gift_wrap: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    gateway_order_id: String,
    #[serde(default)]
    gateway_payment_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Ignored,
}

/// Settlement verifier: creates gateway payment intents for the current cart
/// total, verifies payment proofs, settles verified payments into orders,
/// and reconciles asynchronous gateway webhooks.
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    config: GatewayConfig,
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    carts: Arc<CartService>,
    pricing: Arc<PricingService>,
    events: EventSender,
    broadcaster: Arc<Broadcaster>,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: GatewayConfig,
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<OrderService>,
        carts: Arc<CartService>,
        pricing: Arc<PricingService>,
        events: EventSender,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            db,
            config,
            gateway,
            orders,
            carts,
            pricing,
            events,
            broadcaster,
        }
    }

    /// Registers a gateway order for the caller's current cart total. The
    /// amount is always computed server-side; nothing from the client is
    /// trusted.
    #[instrument(skip(self))]
    pub async fn create_intent(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<GatewayOrder, ServiceError> {
        let cart = self.carts.get_or_create(customer_id, customer_kind).await?;
        let lines = self.carts.snapshot(cart.id).await?;
        let breakdown = self
            .pricing
            .price_lines(
                &lines,
                customer_id,
                customer_kind,
                cart.coupon_code.as_deref(),
                cart.gift_wrap,
            )
            .await?;

        let receipt = format!("{customer_id}-{:08x}", rand::random::<u32>());
        self.gateway
            .create_order(breakdown.total_price, &self.config.currency, &receipt)
            .await
    }

    /// Checks the client-supplied payment proof against the key secret.
    pub fn verify_payment_proof(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<(), ServiceError> {
        let payload = format!("{gateway_order_id}|{gateway_payment_id}");
        verify_signature(&self.config.key_secret, &payload, signature)
    }

    /// Verifies a payment proof and settles the cart into an order.
    ///
    /// The proof is checked before anything else; nothing is read or returned
    /// on a bad signature. Idempotent on `gateway_order_id`: a replay by the
    /// same customer returns the already-settled order without touching stock
    /// or the cart. If the payment is genuine but the stock reservation is
    /// lost to a concurrent buyer, the payment is refunded and the caller
    /// gets a conflict.
    #[instrument(skip(self, request), fields(gateway_order_id = %request.gateway_order_id))]
    pub async fn verify_and_create_order(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        request: VerifyPaymentRequest,
    ) -> Result<(order::Model, bool), ServiceError> {
        self.verify_payment_proof(
            &request.gateway_order_id,
            &request.gateway_payment_id,
            &request.signature,
        )?;

        if let Some(existing) = self
            .orders
            .find_by_gateway_order_for(&request.gateway_order_id, customer_id, customer_kind)
            .await?
        {
            info!(order_id = %existing.id, "replayed verification for settled order");
            return Ok((existing, false));
        }

        self.events
            .send_or_log(Event::PaymentVerified {
                gateway_order_id: request.gateway_order_id.clone(),
                gateway_payment_id: request.gateway_payment_id.clone(),
            })
            .await;

        let created = self
            .orders
            .create_from_cart(
                customer_id,
                customer_kind,
                NewOrder {
                    delivery_address: request.delivery_address,
                    payment_method: PaymentMethod::Online,
                    gift_wrap: request.gift_wrap,
                    payment: Some(VerifiedPayment {
                        gateway_order_id: request.gateway_order_id.clone(),
                        gateway_payment_id: request.gateway_payment_id.clone(),
                        gateway_signature: request.signature.clone(),
                    }),
                },
            )
            .await;

        match created {
            Ok(order) => Ok((order, true)),
            Err(ServiceError::InsufficientStock { product_id, .. }) => {
                // The customer has paid but another buyer took the stock.
                // Refund in full before surfacing the conflict.
                warn!(
                    gateway_payment_id = %request.gateway_payment_id,
                    %product_id,
                    "reservation lost after payment, refunding"
                );
                match self.gateway.refund(&request.gateway_payment_id, None).await {
                    Ok(refund) => info!(refund_id = %refund.refund_id, "refund issued"),
                    Err(e) => {
                        // Leave reconciliation to the refund webhook / ops.
                        tracing::error!(error = %e, "automatic refund failed");
                    }
                }
                Err(ServiceError::Conflict(
                    "Items sold out during payment; the payment has been refunded".into(),
                ))
            }
            // Two concurrent settlements of the same proof race the unique
            // index on gateway_order_id; the loser resolves to the winner's
            // order instead of double-settling.
            Err(ServiceError::DatabaseError(db_err))
                if matches!(
                    db_err.sql_err(),
                    Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
                ) =>
            {
                match self
                    .orders
                    .find_by_gateway_order_for(&request.gateway_order_id, customer_id, customer_kind)
                    .await?
                {
                    Some(existing) => {
                        info!(order_id = %existing.id, "concurrent settlement already landed");
                        Ok((existing, false))
                    }
                    None => Err(ServiceError::DatabaseError(db_err)),
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Refunds an order's captured payment and cancels the order while it is
    /// still cancellable. The gateway refund runs before any local state
    /// changes, so a gateway failure leaves the order untouched and the call
    /// can simply be retried.
    #[instrument(skip(self))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        actor: &str,
    ) -> Result<order::Model, ServiceError> {
        let order = self.orders.get(order_id).await?;
        if order.payment_status != PaymentStatus::Success {
            return Err(ServiceError::Conflict(
                "Order has no captured payment to refund".into(),
            ));
        }
        let payment_id = order.gateway_payment_id.clone().ok_or_else(|| {
            ServiceError::InternalError("captured payment missing gateway payment id".into())
        })?;

        self.gateway.refund(&payment_id, None).await?;
        self.mark_payment(
            &order.gateway_order_id.clone().unwrap_or_default(),
            PaymentStatus::Success,
            PaymentStatus::Refunded,
            None,
        )
        .await?;

        if order.status.is_cancellable() {
            self.orders
                .cancel(order_id, reason.or(Some("payment refunded".into())), actor)
                .await?;
        }

        self.events
            .send_or_log(Event::PaymentRefunded { order_id })
            .await;
        self.broadcaster.publish(
            &broadcast::order_topic(order_id),
            ChannelMessage::PaymentEvent {
                order_id,
                status: "refunded".into(),
            },
        );

        self.orders.get(order_id).await
    }

    /// Applies a gateway webhook. The signature covers the raw body bytes
    /// with the dedicated webhook secret, not the API key secret.
    #[instrument(skip(self, body, signature))]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        verify_raw_signature(&self.config.webhook_secret, body, signature)?;

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| ServiceError::ValidationError(format!("malformed webhook body: {e}")))?;

        match envelope.event.as_str() {
            "payment.captured" => self.webhook_captured(&envelope.payload).await,
            "payment.failed" => self.webhook_failed(&envelope.payload).await,
            "refund.processed" => self.webhook_refunded(&envelope.payload).await,
            other => {
                info!(event = other, "ignoring unhandled webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn webhook_captured(
        &self,
        payload: &WebhookPayload,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(order) = self
            .orders
            .find_by_gateway_order(&payload.gateway_order_id)
            .await?
        else {
            // The capture usually arrives before the client calls verify.
            // Fail the delivery so the gateway retries once the order exists;
            // acknowledging here would drop the only reconciliation signal.
            warn!(gateway_order_id = %payload.gateway_order_id, "capture webhook for unknown order");
            return Err(ServiceError::EventError(format!(
                "no order settled for gateway order {}",
                payload.gateway_order_id
            )));
        };

        let moved = self
            .mark_payment(
                &payload.gateway_order_id,
                PaymentStatus::Pending,
                PaymentStatus::Success,
                payload.gateway_payment_id.clone(),
            )
            .await?;
        if !moved {
            return Ok(WebhookOutcome::Ignored);
        }

        self.events
            .send_or_log(Event::PaymentCaptured { order_id: order.id })
            .await;
        self.broadcaster.publish(
            &broadcast::order_topic(order.id),
            ChannelMessage::PaymentEvent {
                order_id: order.id,
                status: "success".into(),
            },
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn webhook_failed(
        &self,
        payload: &WebhookPayload,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(order) = self
            .orders
            .find_by_gateway_order(&payload.gateway_order_id)
            .await?
        else {
            return Ok(WebhookOutcome::Ignored);
        };

        let moved = self
            .mark_payment(
                &payload.gateway_order_id,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                None,
            )
            .await?;
        if !moved {
            return Ok(WebhookOutcome::Ignored);
        }

        self.events
            .send_or_log(Event::PaymentFailed { order_id: order.id })
            .await;
        Ok(WebhookOutcome::Processed)
    }

    async fn webhook_refunded(
        &self,
        payload: &WebhookPayload,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(order) = self
            .orders
            .find_by_gateway_order(&payload.gateway_order_id)
            .await?
        else {
            return Ok(WebhookOutcome::Ignored);
        };

        let moved = self
            .mark_payment(
                &payload.gateway_order_id,
                PaymentStatus::Success,
                PaymentStatus::Refunded,
                None,
            )
            .await?;
        if !moved {
            return Ok(WebhookOutcome::Ignored);
        }

        if order.status.is_cancellable() {
            self.orders
                .cancel(order.id, Some("payment refunded".into()), "system")
                .await?;
        }
        self.events
            .send_or_log(Event::PaymentRefunded { order_id: order.id })
            .await;
        Ok(WebhookOutcome::Processed)
    }

    /// Compare-and-swap on the payment status keyed by gateway order id.
    /// Returns false when the order was already past `from`, which is how
    /// webhook redeliveries become no-ops.
    async fn mark_payment(
        &self,
        gateway_order_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        gateway_payment_id: Option<String>,
    ) -> Result<bool, ServiceError> {
        let mut update = Order::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
        if to == PaymentStatus::Success {
            update = update.col_expr(
                order::Column::PaymentVerifiedAt,
                Expr::value(Some(Utc::now())),
            );
        }
        if let Some(payment_id) = gateway_payment_id {
            update = update.col_expr(
                order::Column::GatewayPaymentId,
                Expr::value(Some(payment_id)),
            );
        }

        let result = update
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .filter(order::Column::PaymentStatus.eq(from))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn sign(secret: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn genuine_signature_verifies() {
        let secret = "k3y-s3cret-0123456789";
        let payload = "order_abc|pay_def";
        let signature = sign(secret, payload);
        assert!(verify_signature(secret, payload, &signature).is_ok());
    }

    #[test]
    fn tampered_payment_id_rejected() {
        let secret = "k3y-s3cret-0123456789";
        let signature = sign(secret, "order_abc|pay_def");
        assert_matches!(
            verify_signature(secret, "order_abc|pay_evil", &signature),
            Err(ServiceError::SignatureInvalid)
        );
    }

    #[test]
    fn non_hex_signature_rejected() {
        assert_matches!(
            verify_signature("secret", "payload", "not-hex!"),
            Err(ServiceError::SignatureInvalid)
        );
    }

    #[test]
    fn webhook_signature_covers_raw_bytes() {
        let secret = "webhook-secret-0123456789";
        let body = br#"{"event":"payment.captured","payload":{"gateway_order_id":"order_1"}}"#;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_raw_signature(secret, body, &signature).is_ok());
        // A single flipped byte invalidates the signature
        let mut tampered = body.to_vec();
        tampered[10] ^= 1;
        assert!(verify_raw_signature(secret, &tampered, &signature).is_err());
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(235)).unwrap(), 23500);
        assert_eq!(to_minor_units(dec!(49.99)).unwrap(), 4999);
        assert_eq!(from_minor_units(23500), dec!(235));
    }

    #[tokio::test]
    async fn gateway_failures_surface_as_payment_errors() {
        let mut mock = MockPaymentGateway::new();
        mock.expect_create_order()
            .returning(|_, _, _| Err(ServiceError::PaymentFailed("upstream 503".into())));
        let gateway: Arc<dyn PaymentGateway> = Arc::new(mock);

        let result = gateway.create_order(dec!(250), "INR", "receipt-1").await;
        assert_matches!(result, Err(ServiceError::PaymentFailed(_)));
    }

    #[test]
    fn webhook_envelope_parses() {
        let body = r#"{
            "event": "payment.captured",
            "payload": {"gateway_order_id": "order_1", "gateway_payment_id": "pay_9"}
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.event, "payment.captured");
        assert_eq!(envelope.payload.gateway_order_id, "order_1");
        assert_eq!(envelope.payload.gateway_payment_id.as_deref(), Some("pay_9"));
    }
}
