#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmart_api::{
    broadcast::Broadcaster,
    config::{AppConfig, GatewayConfig, PricingConfig},
    db,
    entities::{
        coupon::{self, DiscountType},
        customer::{self, BusinessStatus, CustomerKind},
        delivery_partner, product,
    },
    errors::ServiceError,
    events::{process_events, EventSender},
    services::{
        notifications::LogNotifier,
        payments::{GatewayOrder, GatewayRefund, PaymentGateway},
    },
    AppState,
};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectOptions, Database};
use sha2::Sha256;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const KEY_SECRET: &str = "test-key-secret-0123456789";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret-0123456789";

/// In-memory stand-in for the payment gateway. Records refunds so tests can
/// assert the automatic-refund path fired, and can be told to reject refunds
/// to exercise the gateway-failure branches.
pub struct StubGateway {
    pub refunds: Mutex<Vec<String>>,
    fail_refunds: AtomicBool,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            refunds: Mutex::new(Vec::new()),
            fail_refunds: AtomicBool::new(false),
        }
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }

    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        Ok(GatewayOrder {
            gateway_order_id: format!("order_{}", Uuid::new_v4().simple()),
            amount,
            currency: currency.to_string(),
        })
    }

    async fn refund(
        &self,
        gateway_payment_id: &str,
        _amount: Option<Decimal>,
    ) -> Result<GatewayRefund, ServiceError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentFailed("refund rejected".into()));
        }
        self.refunds
            .lock()
            .unwrap()
            .push(gateway_payment_id.to_string());
        Ok(GatewayRefund {
            refund_id: format!("rfnd_{}", Uuid::new_v4().simple()),
        })
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        event_channel_capacity: 64,
        broadcast_capacity: 64,
        db_max_connections: 1,
        db_connect_timeout_secs: 5,
        pricing: PricingConfig::default(),
        gateway: GatewayConfig {
            base_url: "http://gateway.invalid".to_string(),
            key_id: "rzp_test_key".to_string(),
            key_secret: KEY_SECRET.to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            timeout_secs: 5,
            currency: "INR".to_string(),
        },
    }
}

/// Fresh application state over an in-memory database, with the event loop
/// running and a stub gateway.
pub async fn setup() -> (Arc<AppState>, Arc<StubGateway>) {
    setup_with_gateway(Arc::new(StubGateway::new())).await
}

pub async fn setup_with_gateway(gateway: Arc<StubGateway>) -> (Arc<AppState>, Arc<StubGateway>) {
    // A single connection keeps every query on the same in-memory database.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let conn = Database::connect(options)
        .await
        .expect("sqlite in-memory connection");
    db::bootstrap_schema(&conn).await.expect("schema bootstrap");

    let config = test_config();
    let broadcaster = Arc::new(Broadcaster::new(config.broadcast_capacity));
    let (tx, rx) = mpsc::channel(config.event_channel_capacity);
    tokio::spawn(process_events(
        rx,
        broadcaster.clone(),
        Arc::new(LogNotifier),
    ));

    let state = dashmart_api::build_state(
        conn,
        config,
        gateway.clone(),
        EventSender::new(tx),
        broadcaster,
    );
    (state, gateway)
}

pub async fn seed_product(state: &AppState, price: Decimal, stock: i32) -> product::Model {
    seed_product_full(state, price, stock, None, None, 1).await
}

pub async fn seed_product_full(
    state: &AppState,
    price: Decimal,
    stock: i32,
    discount_price: Option<Decimal>,
    business_price: Option<Decimal>,
    min_order_qty: i32,
) -> product::Model {
    let now = Utc::now();
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(format!("Test product {}", Uuid::new_v4().simple())),
        category: Set("groceries".to_string()),
        price: Set(price),
        discount_price: Set(discount_price),
        business_price: Set(business_price),
        stock_quantity: Set(stock),
        in_stock: Set(stock > 0),
        min_order_qty: Set(min_order_qty),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*state.db)
    .await
    .expect("seed product")
}

pub async fn seed_customer(state: &AppState) -> customer::Model {
    customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        kind: Set(CustomerKind::Customer),
        name: Set("Asha".to_string()),
        phone: Set("9000000001".to_string()),
        business_status: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(&*state.db)
    .await
    .expect("seed customer")
}

pub async fn seed_business(state: &AppState, status: BusinessStatus) -> customer::Model {
    customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        kind: Set(CustomerKind::Business),
        name: Set("Corner Store".to_string()),
        phone: Set("9000000002".to_string()),
        business_status: Set(Some(status)),
        created_at: Set(Utc::now()),
    }
    .insert(&*state.db)
    .await
    .expect("seed business")
}

pub async fn seed_partner(state: &AppState, is_available: bool) -> delivery_partner::Model {
    delivery_partner::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Ravi".to_string()),
        phone: Set("9000000003".to_string()),
        is_available: Set(is_available),
        branch_id: Set(None),
        last_latitude: Set(None),
        last_longitude: Set(None),
        location_updated_at: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(&*state.db)
    .await
    .expect("seed partner")
}

pub async fn seed_coupon(
    state: &AppState,
    code: &str,
    discount_type: DiscountType,
    discount_value: Decimal,
    max_discount: Option<Decimal>,
) -> coupon::Model {
    seed_coupon_limits(
        state,
        code,
        discount_type,
        discount_value,
        max_discount,
        None,
        1,
        false,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn seed_coupon_limits(
    state: &AppState,
    code: &str,
    discount_type: DiscountType,
    discount_value: Decimal,
    max_discount: Option<Decimal>,
    usage_limit: Option<i32>,
    per_user_limit: i32,
    first_order_only: bool,
) -> coupon::Model {
    let now = Utc::now();
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        discount_type: Set(discount_type),
        discount_value: Set(discount_value),
        max_discount: Set(max_discount),
        min_order_amount: Set(Decimal::ZERO),
        valid_from: Set(now - Duration::days(1)),
        valid_until: Set(now + Duration::days(30)),
        usage_limit: Set(usage_limit),
        used_count: Set(0),
        per_user_limit: Set(per_user_limit),
        first_order_only: Set(first_order_only),
        is_active: Set(true),
        applicable_categories: Set(None),
        applicable_products: Set(None),
        created_at: Set(now),
    }
    .insert(&*state.db)
    .await
    .expect("seed coupon")
}

fn hmac_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Client-side payment proof as the gateway SDK would produce it.
pub fn sign_proof(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    hmac_hex(
        KEY_SECRET,
        format!("{gateway_order_id}|{gateway_payment_id}").as_bytes(),
    )
}

pub fn sign_webhook(body: &[u8]) -> String {
    hmac_hex(WEBHOOK_SECRET, body)
}

pub fn address() -> serde_json::Value {
    serde_json::json!({
        "line1": "14 MG Road",
        "city": "Bengaluru",
        "pincode": "560001"
    })
}
