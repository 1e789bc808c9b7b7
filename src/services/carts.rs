use crate::{
    entities::{
        cart, cart_item,
        coupon,
        customer::CustomerKind,
        product, Cart, CartItem, Product,
    },
    errors::ServiceError,
    services::pricing::{self, PriceBreakdown, PricedLine, PricingService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, IntoActiveModel, QueryFilter,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// One cart line as returned to the client, priced for the owner's tier.
#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub coupon_code: Option<String>,
    pub gift_wrap: bool,
    pub items: Vec<CartLineView>,
    pub pricing: PriceBreakdown,
}

/// Per-customer cart storage. Every mutation re-prices through the same
/// engine the checkout uses, so the preview a customer sees is the amount
/// they will be charged.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    pricing: Arc<PricingService>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, pricing: Arc<PricingService>) -> Self {
        Self { db, pricing }
    }

    /// Fetches the cart for an identity, creating an empty one on first use.
    pub async fn get_or_create(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<cart::Model, ServiceError> {
        let existing = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .filter(cart::Column::CustomerKind.eq(customer_kind))
            .one(&*self.db)
            .await?;

        if let Some(cart) = existing {
            return Ok(cart);
        }

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            customer_kind: Set(customer_kind),
            coupon_code: Set(None),
            discount_cache: Set(Decimal::ZERO),
            gift_wrap: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(cart.insert(&*self.db).await?)
    }

    /// Cart lines joined with their products. An empty vec is a valid result
    /// here; `snapshot` is the strict variant used by checkout.
    pub async fn lines(&self, cart_id: Uuid) -> Result<Vec<PricedLine>, ServiceError> {
        let rows = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for (item, product) in rows {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart item {} references missing product",
                    item.id
                ))
            })?;
            lines.push(PricedLine {
                product,
                quantity: item.quantity,
            });
        }
        Ok(lines)
    }

    /// Priced lines for checkout. Rejects an empty cart so downstream code
    /// never settles a zero-line order.
    pub async fn snapshot(&self, cart_id: Uuid) -> Result<Vec<PricedLine>, ServiceError> {
        let lines = self.lines(cart_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        Ok(lines)
    }

    /// Full cart view with the current price breakdown. A coupon that has
    /// since become invalid is dropped from the cart rather than failing the
    /// view.
    pub async fn view(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(customer_id, customer_kind).await?;
        let lines = self.lines(cart.id).await?;

        let mut coupon_code = cart.coupon_code.clone();
        let breakdown = if lines.is_empty() {
            empty_breakdown()
        } else {
            match self
                .pricing
                .price_lines(
                    &lines,
                    customer_id,
                    customer_kind,
                    coupon_code.as_deref(),
                    cart.gift_wrap,
                )
                .await
            {
                Ok(breakdown) => breakdown,
                Err(ServiceError::CouponRejected(reason)) => {
                    info!(cart_id = %cart.id, reason = reason.code(), "dropping stale coupon from cart");
                    self.detach_coupon(&cart).await?;
                    coupon_code = None;
                    self.pricing
                        .price_lines(&lines, customer_id, customer_kind, None, cart.gift_wrap)
                        .await?
                }
                Err(other) => return Err(other),
            }
        };

        Ok(CartView {
            cart_id: cart.id,
            coupon_code,
            gift_wrap: cart.gift_wrap,
            items: line_views(&lines, customer_kind),
            pricing: breakdown,
        })
    }

    /// Adds a product to the cart, merging with any existing line. The
    /// business minimum-order quantity is checked against the merged total,
    /// not the increment.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".into(),
            ));
        }

        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))?;
        if !product.in_stock {
            return Err(ServiceError::ValidationError(format!(
                "{} is out of stock",
                product.name
            )));
        }

        let cart = self.get_or_create(customer_id, customer_kind).await?;
        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        let merged = existing.as_ref().map_or(0, |item| item.quantity) + quantity;
        enforce_min_order_qty(&product, customer_kind, merged)?;

        match existing {
            Some(item) => {
                let mut item = item.into_active_model();
                item.quantity = Set(merged);
                item.update(&*self.db).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    added_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        self.touch(&cart).await?;
        self.view(customer_id, customer_kind).await
    }

    /// Sets a line to an exact quantity; zero removes the line.
    pub async fn update_item(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".into(),
            ));
        }
        if quantity == 0 {
            return self.remove_item(customer_id, customer_kind, product_id).await;
        }

        let cart = self.get_or_create(customer_id, customer_kind).await?;
        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Item not in cart".into()))?;

        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".into()))?;
        enforce_min_order_qty(&product, customer_kind, quantity)?;

        let mut item = item.into_active_model();
        item.quantity = Set(quantity);
        item.update(&*self.db).await?;

        self.touch(&cart).await?;
        self.view(customer_id, customer_kind).await
    }

    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(customer_id, customer_kind).await?;
        let deleted = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound("Item not in cart".into()));
        }

        self.touch(&cart).await?;
        self.view(customer_id, customer_kind).await
    }

    pub async fn clear(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<(), ServiceError> {
        let cart = self.get_or_create(customer_id, customer_kind).await?;
        Self::clear_items(&*self.db, cart.id).await
    }

    /// Empties a cart and resets its coupon state. Takes any connection so
    /// order settlement can clear the cart in its own transaction, after the
    /// order row is durable.
    pub async fn clear_items<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;

        let update = cart::ActiveModel {
            id: Set(cart_id),
            coupon_code: Set(None),
            discount_cache: Set(Decimal::ZERO),
            gift_wrap: Set(false),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        Cart::update(update).exec(conn).await?;
        Ok(())
    }

    /// Applies a coupon to the cart: validates against the current lines,
    /// stores the code, and caches the computed discount.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        code: &str,
    ) -> Result<(coupon::Model, CartView), ServiceError> {
        let cart = self.get_or_create(customer_id, customer_kind).await?;
        let lines = self.snapshot(cart.id).await?;

        let (coupon, ctx) = self
            .pricing
            .resolve_coupon(code, customer_id, customer_kind)
            .await?;
        let breakdown = pricing::price(
            &lines,
            customer_kind,
            Some((&coupon, ctx)),
            cart.gift_wrap,
            self.pricing.config(),
            Utc::now(),
        )
        .map_err(ServiceError::CouponRejected)?;

        let mut update = cart.clone().into_active_model();
        update.coupon_code = Set(Some(coupon.code.clone()));
        update.discount_cache = Set(breakdown.discount);
        update.updated_at = Set(Utc::now());
        update.update(&*self.db).await?;

        Ok((
            coupon,
            CartView {
                cart_id: cart.id,
                coupon_code: breakdown.coupon_code.clone(),
                gift_wrap: cart.gift_wrap,
                items: line_views(&lines, customer_kind),
                pricing: breakdown,
            },
        ))
    }

    pub async fn remove_coupon(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
    ) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(customer_id, customer_kind).await?;
        self.detach_coupon(&cart).await?;
        self.view(customer_id, customer_kind).await
    }

    pub async fn set_gift_wrap(
        &self,
        customer_id: Uuid,
        customer_kind: CustomerKind,
        gift_wrap: bool,
    ) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(customer_id, customer_kind).await?;
        let mut update = cart.into_active_model();
        update.gift_wrap = Set(gift_wrap);
        update.updated_at = Set(Utc::now());
        update.update(&*self.db).await?;
        self.view(customer_id, customer_kind).await
    }

    async fn detach_coupon(&self, cart: &cart::Model) -> Result<(), ServiceError> {
        let mut update = cart.clone().into_active_model();
        update.coupon_code = Set(None);
        update.discount_cache = Set(Decimal::ZERO);
        update.updated_at = Set(Utc::now());
        update.update(&*self.db).await?;
        Ok(())
    }

    async fn touch(&self, cart: &cart::Model) -> Result<(), ServiceError> {
        let mut update = cart.clone().into_active_model();
        update.updated_at = Set(Utc::now());
        update.update(&*self.db).await?;
        Ok(())
    }
}

fn enforce_min_order_qty(
    product: &product::Model,
    customer_kind: CustomerKind,
    quantity: i32,
) -> Result<(), ServiceError> {
    if customer_kind == CustomerKind::Business && quantity < product.min_order_qty {
        return Err(ServiceError::ValidationError(format!(
            "{} requires a minimum of {} units for business orders",
            product.name, product.min_order_qty
        )));
    }
    Ok(())
}

fn line_views(lines: &[PricedLine], customer_kind: CustomerKind) -> Vec<CartLineView> {
    lines
        .iter()
        .map(|line| {
            let unit = pricing::unit_price(&line.product, customer_kind);
            CartLineView {
                product_id: line.product.id,
                product_name: line.product.name.clone(),
                quantity: line.quantity,
                unit_price: unit,
                line_total: unit * Decimal::from(line.quantity),
            }
        })
        .collect()
}

fn empty_breakdown() -> PriceBreakdown {
    PriceBreakdown {
        items_total: Decimal::ZERO,
        discount: Decimal::ZERO,
        delivery_fee: Decimal::ZERO,
        gift_wrap_fee: Decimal::ZERO,
        total_price: Decimal::ZERO,
        coupon_code: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product_with_moq(moq: i32) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Rice 5kg".into(),
            category: "staples".into(),
            price: dec!(450),
            discount_price: None,
            business_price: Some(dec!(420)),
            stock_quantity: 50,
            in_stock: true,
            min_order_qty: moq,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn business_moq_applies_to_business_tier_only() {
        let product = product_with_moq(5);
        assert!(enforce_min_order_qty(&product, CustomerKind::Customer, 1).is_ok());
        assert!(matches!(
            enforce_min_order_qty(&product, CustomerKind::Business, 4),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(enforce_min_order_qty(&product, CustomerKind::Business, 5).is_ok());
    }

    #[test]
    fn line_views_price_per_tier() {
        let product = product_with_moq(1);
        let lines = vec![PricedLine {
            product,
            quantity: 3,
        }];

        let retail = line_views(&lines, CustomerKind::Customer);
        assert_eq!(retail[0].unit_price, dec!(450));
        assert_eq!(retail[0].line_total, dec!(1350));

        let business = line_views(&lines, CustomerKind::Business);
        assert_eq!(business[0].unit_price, dec!(420));
        assert_eq!(business[0].line_total, dec!(1260));
    }
}
