use super::customer::CustomerKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shopping cart entity. One cart per `(customer_id, customer_kind)` identity;
/// cleared, never deleted, when its lines become an order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_kind: CustomerKind,
    /// At most one applied coupon
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    /// Discount computed when the coupon was applied; re-validated at checkout
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_cache: Decimal,
    pub gift_wrap: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
