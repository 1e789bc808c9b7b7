use crate::{
    broadcast::{self, Broadcaster, ChannelMessage},
    entities::{
        coupon, coupon_redemption,
        customer::{BusinessStatus, CustomerKind},
        delivery_partner, order,
        order::{OrderStatus, PaymentMethod, PaymentStatus},
        order_item, order_status_history, Coupon, Customer, DeliveryPartner, Order, OrderItem,
        OrderStatusHistory,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::CartService,
        pricing::{self, PricingService},
        sequences::{self, ORDER_SEQUENCE},
        stock::StockLedger,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Payment proof already verified by the settlement verifier. Presence of
/// this struct is the service-level witness that verification happened.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub delivery_address: serde_json::Value,
    pub payment_method: PaymentMethod,
    pub gift_wrap: Option<bool>,
    pub payment: Option<VerifiedPayment>,
}

/// Live tracking view: the order, its status trail, and the partner's last
/// reported position while the order is on the road.
#[derive(Debug, Serialize)]
pub struct TrackingView {
    pub order: order::Model,
    pub history: Vec<order_status_history::Model>,
    pub partner_location: Option<PartnerLocation>,
}

#[derive(Debug, Serialize)]
pub struct PartnerLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Order settlement and lifecycle. Creation is a single transaction around
/// stock reservation, order persistence, and coupon redemption; transitions
/// are compare-and-swap on the previous status so concurrent writers cannot
/// double-apply.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    carts: Arc<CartService>,
    pricing: Arc<PricingService>,
    events: EventSender,
    broadcaster: Arc<Broadcaster>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: Arc<CartService>,
        pricing: Arc<PricingService>,
        events: EventSender,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            db,
            carts,
            pricing,
            events,
            broadcaster,
        }
    }

    /// Settles the caller's cart into an order.
    ///
    /// For online payment the proof must already be verified; this method
    /// only performs the durable part. The cart is left untouched on every
    /// failure path so the customer can retry.
    #[instrument(skip(self, input), fields(%customer_id, ?customer_kind))]
    pub async fn create_from_cart(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        input: NewOrder,
    ) -> Result<order::Model, ServiceError> {
        self.check_eligibility(customer_id, customer_kind).await?;

        if input.payment_method == PaymentMethod::Online && input.payment.is_none() {
            return Err(ServiceError::ValidationError(
                "Online orders require a verified payment".into(),
            ));
        }

        let cart = self.carts.get_or_create(customer_id, customer_kind).await?;
        let lines = self.carts.snapshot(cart.id).await?;

        // Advisory pre-check. The transactional reserve below is the real
        // guard; this just fails fast before any payment-side work.
        for line in &lines {
            if line.quantity > line.product.stock_quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id: line.product.id,
                    requested: line.quantity,
                });
            }
        }

        let gift_wrap = input.gift_wrap.unwrap_or(cart.gift_wrap);
        let breakdown = self
            .pricing
            .price_lines(
                &lines,
                customer_id,
                customer_kind,
                cart.coupon_code.as_deref(),
                gift_wrap,
            )
            .await?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await?;

        for line in &lines {
            StockLedger::reserve(&txn, line.product.id, line.quantity).await?;
        }

        let sequence = sequences::next_value(&txn, ORDER_SEQUENCE).await?;
        let order_number = sequences::format_order_number(sequence);

        let (payment_status, verified_at, gw_order, gw_payment, gw_signature) =
            match (&input.payment_method, &input.payment) {
                (PaymentMethod::Online, Some(proof)) => (
                    PaymentStatus::Success,
                    Some(now),
                    Some(proof.gateway_order_id.clone()),
                    Some(proof.gateway_payment_id.clone()),
                    Some(proof.gateway_signature.clone()),
                ),
                _ => (PaymentStatus::Pending, None, None, None, None),
            };

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(customer_id),
            customer_kind: Set(customer_kind),
            status: Set(OrderStatus::Pending),
            items_total: Set(breakdown.items_total),
            discount: Set(breakdown.discount),
            delivery_fee: Set(breakdown.delivery_fee),
            gift_wrap_fee: Set(breakdown.gift_wrap_fee),
            total_price: Set(breakdown.total_price),
            payment_method: Set(input.payment_method),
            payment_status: Set(payment_status),
            gateway_order_id: Set(gw_order),
            gateway_payment_id: Set(gw_payment),
            gateway_signature: Set(gw_signature),
            payment_verified_at: Set(verified_at),
            coupon_code: Set(breakdown.coupon_code.clone()),
            delivery_address: Set(input.delivery_address),
            delivery_partner_id: Set(None),
            cancellation_reason: Set(None),
            cancelled_by: Set(None),
            actual_delivery_time: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(0),
        }
        .insert(&txn)
        .await?;

        for line in &lines {
            let unit = pricing::unit_price(&line.product, customer_kind);
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                product_name: Set(line.product.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(unit),
                line_total: Set(unit * Decimal::from(line.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        record_history(&txn, order_id, OrderStatus::Pending, "customer").await?;

        if let Some(code) = &breakdown.coupon_code {
            self.redeem_coupon(&txn, code, customer_id, customer_kind, order_id)
                .await?;
        }

        CartService::clear_items(&txn, cart.id).await?;

        txn.commit().await?;

        info!(%order_id, %order_number, "order created");
        self.events
            .send_or_log(Event::OrderCreated {
                order_id,
                order_number: order_number.clone(),
                customer_id,
            })
            .await;
        for line in &lines {
            self.events
                .send_or_log(Event::StockReserved {
                    product_id: line.product.id,
                    quantity: line.quantity,
                })
                .await;
        }
        if let Some(code) = &breakdown.coupon_code {
            self.events
                .send_or_log(Event::CouponRedeemed {
                    code: code.clone(),
                    order_id,
                })
                .await;
        }

        self.get(order_id).await
    }

    /// Conditional increment of the coupon's global usage counter plus the
    /// redemption row. Losing the increment race rolls back the whole order.
    async fn redeem_coupon<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::InternalError(format!("coupon {code} disappeared")))?;

        let incremented = Coupon::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await?;
        if incremented.rows_affected == 0 {
            return Err(ServiceError::CouponRejected(
                crate::errors::CouponRejection::LimitReached,
            ));
        }

        coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            customer_id: Set(customer_id),
            customer_kind: Set(customer_kind),
            order_id: Set(order_id),
            redeemed_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;
        Ok(())
    }

    /// Business buyers must be approved before they can place orders.
    async fn check_eligibility(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<(), ServiceError> {
        if customer_kind != CustomerKind::Business {
            return Ok(());
        }
        let account = Customer::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Business account not found".into()))?;
        if account.business_status != Some(BusinessStatus::Approved) {
            return Err(ServiceError::Forbidden(
                "Business account is not approved for ordering".into(),
            ));
        }
        Ok(())
    }

    pub async fn get(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))
    }

    /// Fetches an order scoped to its owner. Another identity's order is
    /// indistinguishable from a missing one.
    pub async fn get_for(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::CustomerKind.eq(customer_kind))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".into()))
    }

    pub async fn list_for(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<Vec<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::CustomerKind.eq(customer_kind))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn find_by_gateway_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&*self.db)
            .await?)
    }

    /// Owner-scoped variant for the verify replay path. A gateway order id
    /// settled by a different identity reads as absent.
    pub async fn find_by_gateway_order_for(
        &self,
        gateway_order_id: &str,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::CustomerKind.eq(customer_kind))
            .one(&*self.db)
            .await?)
    }

    pub async fn items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    /// Advances an order along the lifecycle. The persisted update is a
    /// compare-and-swap on the loaded status; of two concurrent writers only
    /// one lands, the other gets `InvalidTransition`.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        actor: &str,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get(order_id).await?;
        let from = order.status;
        if !from.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        let mut update = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1));
        if next == OrderStatus::Delivered {
            update = update.col_expr(
                order::Column::ActualDeliveryTime,
                Expr::value(Some(Utc::now())),
            );
        }
        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Lost the race; someone else moved the order first.
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        record_history(&*self.db, order_id, next, actor).await?;

        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.to_string(),
                new_status: next.to_string(),
            })
            .await;
        let message = ChannelMessage::StatusChanged {
            order_id,
            status: next.to_string(),
        };
        self.broadcaster
            .publish(&broadcast::order_topic(order_id), message.clone());
        if next.is_terminal() {
            self.broadcaster.publish(broadcast::OPS_TOPIC, message);
        }

        self.get(order_id).await
    }

    /// Cancels an order while it is still cancellable, releasing reserved
    /// stock exactly once. The release runs only when this call wins the
    /// status compare-and-swap, so a concurrent double-cancel cannot restock
    /// twice.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        actor: &str,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get(order_id).await?;
        let from = order.status;
        if !from.is_cancellable() {
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }

        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(
                order::Column::CancellationReason,
                Expr::value(reason.clone()),
            )
            .col_expr(
                order::Column::CancelledBy,
                Expr::value(Some(actor.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }

        for item in self.items(order_id).await? {
            StockLedger::release(&*self.db, item.product_id, item.quantity).await?;
            self.events
                .send_or_log(Event::StockReleased {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .await;
        }

        record_history(&*self.db, order_id, OrderStatus::Cancelled, actor).await?;

        info!(%order_id, actor, "order cancelled");
        self.events
            .send_or_log(Event::OrderCancelled {
                order_id,
                reason: reason.clone(),
            })
            .await;
        let message = ChannelMessage::OrderCancelled { order_id, reason };
        self.broadcaster
            .publish(&broadcast::order_topic(order_id), message.clone());
        if let Some(partner_id) = order.delivery_partner_id {
            self.broadcaster
                .publish(&broadcast::partner_topic(partner_id), message);
        }

        self.get(order_id).await
    }

    pub async fn tracking(&self, order_id: Uuid) -> Result<TrackingView, ServiceError> {
        let order = self.get(order_id).await?;
        let history = OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let partner_location = match (order.delivery_partner_id, order.status.is_in_transit()) {
            (Some(partner_id), true) => DeliveryPartner::find_by_id(partner_id)
                .one(&*self.db)
                .await?
                .and_then(|partner| location_of(&partner)),
            _ => None,
        };

        Ok(TrackingView {
            order,
            history,
            partner_location,
        })
    }
}

fn location_of(partner: &delivery_partner::Model) -> Option<PartnerLocation> {
    match (partner.last_latitude, partner.last_longitude) {
        (Some(latitude), Some(longitude)) => Some(PartnerLocation {
            latitude,
            longitude,
            updated_at: partner.location_updated_at,
        }),
        _ => None,
    }
}

pub(crate) async fn record_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    actor: &str,
) -> Result<(), ServiceError> {
    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        actor: Set(actor.to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}
