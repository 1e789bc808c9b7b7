use crate::{
    config::PricingConfig,
    entities::{
        coupon::{self, DiscountType},
        coupon_redemption, order,
        customer::CustomerKind,
        product, Coupon, CouponRedemption, Order,
    },
    errors::{CouponRejection, ServiceError},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// A cart line joined with its product, as consumed by the pricing engine.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product: product::Model,
    pub quantity: i32,
}

/// Final price breakdown. The same computation backs the cart preview and the
/// amount charged at settlement; the two must agree bit-for-bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub items_total: Decimal,
    pub discount: Decimal,
    pub delivery_fee: Decimal,
    pub gift_wrap_fee: Decimal,
    pub total_price: Decimal,
    pub coupon_code: Option<String>,
}

/// Redemption counters needed to validate a coupon for one caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct CouponContext {
    pub user_redemptions: i64,
    pub prior_order_count: i64,
}

/// Tier-specific unit price. Pure; reused identically at cart-view time and
/// at order-creation time.
pub fn unit_price(product: &product::Model, tier: CustomerKind) -> Decimal {
    match tier {
        CustomerKind::Business => product
            .business_price
            .or(product.discount_price)
            .unwrap_or(product.price),
        CustomerKind::Customer => product.discount_price.unwrap_or(product.price),
    }
}

pub fn items_total(lines: &[PricedLine], tier: CustomerKind) -> Decimal {
    lines
        .iter()
        .map(|line| unit_price(&line.product, tier) * Decimal::from(line.quantity))
        .sum()
}

fn json_string_array(value: &Option<serde_json::Value>) -> Vec<String> {
    value
        .as_ref()
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Validates a coupon against the cart. Short-circuits on the first failing
/// rule; the rule order is part of the contract (the caller sees the first
/// reason, not an arbitrary one).
pub fn validate_coupon(
    coupon: &coupon::Model,
    lines: &[PricedLine],
    tier: CustomerKind,
    ctx: CouponContext,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if now < coupon.valid_from {
        return Err(CouponRejection::NotYetValid);
    }
    if now > coupon.valid_until {
        return Err(CouponRejection::Expired);
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return Err(CouponRejection::LimitReached);
        }
    }
    if ctx.user_redemptions >= i64::from(coupon.per_user_limit) {
        return Err(CouponRejection::PerUserLimitReached);
    }
    if coupon.first_order_only && ctx.prior_order_count > 0 {
        return Err(CouponRejection::FirstOrderOnly);
    }

    let categories = json_string_array(&coupon.applicable_categories);
    let products = json_string_array(&coupon.applicable_products);
    if !categories.is_empty() || !products.is_empty() {
        let applies = lines.iter().any(|line| {
            products.iter().any(|p| p == &line.product.id.to_string())
                || categories.contains(&line.product.category)
        });
        if !applies {
            return Err(CouponRejection::NotApplicable);
        }
    }

    if items_total(lines, tier) < coupon.min_order_amount {
        return Err(CouponRejection::MinOrderNotMet);
    }
    Ok(())
}

/// Discount amount for a validated coupon: percentage capped at
/// `max_discount`, any discount capped at the items total, rounded to the
/// nearest integer currency unit.
pub fn compute_discount(coupon: &coupon::Model, items_total: Decimal) -> Decimal {
    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let pct = items_total * coupon.discount_value / Decimal::from(100);
            match coupon.max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        DiscountType::Fixed => coupon.discount_value,
    };
    raw.min(items_total)
        .max(Decimal::ZERO)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Prices a cart. Pure: identical inputs always yield an identical breakdown.
/// Pricing with no coupon never fails.
pub fn price(
    lines: &[PricedLine],
    tier: CustomerKind,
    coupon: Option<(&coupon::Model, CouponContext)>,
    gift_wrap: bool,
    cfg: &PricingConfig,
    now: DateTime<Utc>,
) -> Result<PriceBreakdown, CouponRejection> {
    let items_total = items_total(lines, tier);

    let (discount, coupon_code) = match coupon {
        Some((coupon, ctx)) => {
            validate_coupon(coupon, lines, tier, ctx, now)?;
            (compute_discount(coupon, items_total), Some(coupon.code.clone()))
        }
        None => (Decimal::ZERO, None),
    };

    let delivery_fee = if items_total - discount >= cfg.free_delivery_threshold {
        Decimal::ZERO
    } else {
        cfg.delivery_fee
    };
    let gift_wrap_fee = if gift_wrap {
        cfg.gift_wrap_fee
    } else {
        Decimal::ZERO
    };

    let total_price = (items_total - discount + delivery_fee + gift_wrap_fee).max(Decimal::ZERO);

    Ok(PriceBreakdown {
        items_total,
        discount,
        delivery_fee,
        gift_wrap_fee,
        total_price,
        coupon_code,
    })
}

/// Database-aware wrapper: resolves the coupon and its redemption counters,
/// then delegates to the pure engine.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
    config: PricingConfig,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>, config: PricingConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Loads the coupon by code and the caller's redemption/order counters.
    /// Returns `CouponRejected(NotFound)` for unknown codes.
    pub async fn resolve_coupon(
        &self,
        code: &str,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<(coupon::Model, CouponContext), ServiceError> {
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::CouponRejected(CouponRejection::NotFound))?;

        let user_redemptions = CouponRedemption::find()
            .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
            .filter(coupon_redemption::Column::CustomerId.eq(customer_id))
            .filter(coupon_redemption::Column::CustomerKind.eq(customer_kind))
            .count(&*self.db)
            .await? as i64;

        let prior_order_count = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::CustomerKind.eq(customer_kind))
            .filter(order::Column::Status.ne(order::OrderStatus::Cancelled))
            .count(&*self.db)
            .await? as i64;

        Ok((
            coupon,
            CouponContext {
                user_redemptions,
                prior_order_count,
            },
        ))
    }

    /// Prices cart lines for a customer, resolving the coupon if one is set.
    #[instrument(skip(self, lines))]
    pub async fn price_lines(
        &self,
        lines: &[PricedLine],
        customer_id: Uuid,
        customer_kind: CustomerKind,
        coupon_code: Option<&str>,
        gift_wrap: bool,
    ) -> Result<PriceBreakdown, ServiceError> {
        let resolved = match coupon_code {
            Some(code) => Some(
                self.resolve_coupon(code, customer_id, customer_kind)
                    .await?,
            ),
            None => None,
        };

        price(
            lines,
            customer_kind,
            resolved.as_ref().map(|(coupon, ctx)| (coupon, *ctx)),
            gift_wrap,
            &self.config,
            Utc::now(),
        )
        .map_err(ServiceError::CouponRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn product(price: Decimal) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Sparkling water 1L".into(),
            category: "beverages".into(),
            price,
            discount_price: None,
            business_price: None,
            stock_quantity: 100,
            in_stock: true,
            min_order_qty: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(price: Decimal, quantity: i32) -> PricedLine {
        PricedLine {
            product: product(price),
            quantity,
        }
    }

    fn percentage_coupon(value: Decimal, max_discount: Option<Decimal>) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            discount_type: DiscountType::Percentage,
            discount_value: value,
            max_discount,
            min_order_amount: Decimal::ZERO,
            valid_from: Utc::now() - Duration::days(1),
            valid_until: Utc::now() + Duration::days(1),
            usage_limit: None,
            used_count: 0,
            per_user_limit: 1,
            first_order_only: false,
            is_active: true,
            applicable_categories: None,
            applicable_products: None,
            created_at: Utc::now(),
        }
    }

    fn config() -> PricingConfig {
        PricingConfig {
            free_delivery_threshold: dec!(500),
            delivery_fee: dec!(50),
            gift_wrap_fee: dec!(30),
        }
    }

    #[test]
    fn tier_price_selection() {
        let mut p = product(dec!(100));
        p.discount_price = Some(dec!(90));
        p.business_price = Some(dec!(80));

        assert_eq!(unit_price(&p, CustomerKind::Customer), dec!(90));
        assert_eq!(unit_price(&p, CustomerKind::Business), dec!(80));

        p.business_price = None;
        assert_eq!(unit_price(&p, CustomerKind::Business), dec!(90));

        p.discount_price = None;
        assert_eq!(unit_price(&p, CustomerKind::Customer), dec!(100));
        assert_eq!(unit_price(&p, CustomerKind::Business), dec!(100));
    }

    #[test]
    fn plain_cart_with_delivery_fee() {
        // itemsTotal=200 < 500 threshold, so the flat fee applies
        let lines = vec![line(dec!(100), 2)];
        let breakdown = price(
            &lines,
            CustomerKind::Customer,
            None,
            false,
            &config(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(breakdown.items_total, dec!(200));
        assert_eq!(breakdown.discount, Decimal::ZERO);
        assert_eq!(breakdown.delivery_fee, dec!(50));
        assert_eq!(breakdown.total_price, dec!(250));
    }

    #[test]
    fn percentage_discount_capped_by_max_discount() {
        // 10% of 200 is 20, capped at 15 -> total 235
        let lines = vec![line(dec!(100), 2)];
        let coupon = percentage_coupon(dec!(10), Some(dec!(15)));
        let breakdown = price(
            &lines,
            CustomerKind::Customer,
            Some((&coupon, CouponContext::default())),
            false,
            &config(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(breakdown.discount, dec!(15));
        assert_eq!(breakdown.total_price, dec!(235));
    }

    #[test]
    fn fixed_discount_capped_at_items_total() {
        let lines = vec![line(dec!(30), 1)];
        let mut coupon = percentage_coupon(dec!(100), None);
        coupon.discount_type = DiscountType::Fixed;

        let breakdown = price(
            &lines,
            CustomerKind::Customer,
            Some((&coupon, CouponContext::default())),
            false,
            &config(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(breakdown.discount, dec!(30));
        // 30 - 30 + 50 delivery
        assert_eq!(breakdown.total_price, dec!(50));
    }

    #[test]
    fn discount_rounded_to_integer_unit() {
        // 10% of 333 = 33.3 -> 33
        let coupon = percentage_coupon(dec!(10), None);
        assert_eq!(compute_discount(&coupon, dec!(333)), dec!(33));
        // 10% of 335 = 33.5 -> 34 (midpoint away from zero)
        assert_eq!(compute_discount(&coupon, dec!(335)), dec!(34));
    }

    #[test]
    fn free_delivery_threshold_uses_discounted_total() {
        let lines = vec![line(dec!(260), 2)]; // 520
        let mut coupon = percentage_coupon(dec!(0), None);
        coupon.discount_type = DiscountType::Fixed;
        coupon.discount_value = dec!(30);

        // 520 - 30 = 490 < 500 -> fee applies
        let breakdown = price(
            &lines,
            CustomerKind::Customer,
            Some((&coupon, CouponContext::default())),
            false,
            &config(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(breakdown.delivery_fee, dec!(50));

        // without the coupon: 520 >= 500 -> free delivery
        let breakdown = price(
            &lines,
            CustomerKind::Customer,
            None,
            false,
            &config(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(breakdown.delivery_fee, Decimal::ZERO);
    }

    #[test]
    fn gift_wrap_fee_added_when_requested() {
        let lines = vec![line(dec!(100), 1)];
        let breakdown = price(
            &lines,
            CustomerKind::Customer,
            None,
            true,
            &config(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(breakdown.gift_wrap_fee, dec!(30));
        assert_eq!(breakdown.total_price, dec!(180));
    }

    #[test]
    fn validation_order_first_failure_wins() {
        let lines = vec![line(dec!(100), 1)];
        let now = Utc::now();

        let mut coupon = percentage_coupon(dec!(10), None);
        coupon.is_active = false;
        coupon.valid_until = now - Duration::days(1);
        // Inactive is checked before the validity window
        assert_eq!(
            validate_coupon(&coupon, &lines, CustomerKind::Customer, CouponContext::default(), now),
            Err(CouponRejection::Inactive)
        );

        let mut coupon = percentage_coupon(dec!(10), None);
        coupon.valid_until = now - Duration::days(1);
        assert_eq!(
            validate_coupon(&coupon, &lines, CustomerKind::Customer, CouponContext::default(), now),
            Err(CouponRejection::Expired)
        );

        let mut coupon = percentage_coupon(dec!(10), None);
        coupon.usage_limit = Some(5);
        coupon.used_count = 5;
        assert_eq!(
            validate_coupon(&coupon, &lines, CustomerKind::Customer, CouponContext::default(), now),
            Err(CouponRejection::LimitReached)
        );

        let coupon = percentage_coupon(dec!(10), None);
        let ctx = CouponContext {
            user_redemptions: 1,
            prior_order_count: 3,
        };
        assert_eq!(
            validate_coupon(&coupon, &lines, CustomerKind::Customer, ctx, now),
            Err(CouponRejection::PerUserLimitReached)
        );

        let mut coupon = percentage_coupon(dec!(10), None);
        coupon.first_order_only = true;
        let ctx = CouponContext {
            user_redemptions: 0,
            prior_order_count: 2,
        };
        assert_eq!(
            validate_coupon(&coupon, &lines, CustomerKind::Customer, ctx, now),
            Err(CouponRejection::FirstOrderOnly)
        );

        let mut coupon = percentage_coupon(dec!(10), None);
        coupon.min_order_amount = dec!(1000);
        assert_eq!(
            validate_coupon(&coupon, &lines, CustomerKind::Customer, CouponContext::default(), now),
            Err(CouponRejection::MinOrderNotMet)
        );
    }

    #[test]
    fn applicability_matches_product_or_category() {
        let lines = vec![line(dec!(100), 1)];
        let now = Utc::now();

        let mut coupon = percentage_coupon(dec!(10), None);
        coupon.applicable_categories = Some(serde_json::json!(["snacks"]));
        assert_eq!(
            validate_coupon(&coupon, &lines, CustomerKind::Customer, CouponContext::default(), now),
            Err(CouponRejection::NotApplicable)
        );

        coupon.applicable_categories = Some(serde_json::json!(["beverages"]));
        assert!(validate_coupon(
            &coupon,
            &lines,
            CustomerKind::Customer,
            CouponContext::default(),
            now
        )
        .is_ok());

        let mut coupon = percentage_coupon(dec!(10), None);
        coupon.applicable_products =
            Some(serde_json::json!([lines[0].product.id.to_string()]));
        assert!(validate_coupon(
            &coupon,
            &lines,
            CustomerKind::Customer,
            CouponContext::default(),
            now
        )
        .is_ok());
    }

    #[test]
    fn pricing_is_deterministic() {
        let lines = vec![line(dec!(123.45), 3), line(dec!(9.99), 7)];
        let coupon = percentage_coupon(dec!(12), Some(dec!(40)));
        let now = Utc::now();

        let a = price(
            &lines,
            CustomerKind::Customer,
            Some((&coupon, CouponContext::default())),
            true,
            &config(),
            now,
        )
        .unwrap();
        let b = price(
            &lines,
            CustomerKind::Customer,
            Some((&coupon, CouponContext::default())),
            true,
            &config(),
            now,
        )
        .unwrap();
        assert_eq!(a, b);
    }
}
