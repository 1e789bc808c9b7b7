use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coupon business rules. Immutable once issued except for `used_count`,
/// which is incremented with the same conditional-update discipline as stock.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: DiscountType,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_value: Decimal,
    /// Cap on the computed discount for percentage coupons
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub max_discount: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub min_order_amount: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Global redemption cap; unlimited when absent
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub per_user_limit: i32,
    pub first_order_only: bool,
    pub is_active: bool,
    /// JSON array of category names; empty/absent means unrestricted
    #[sea_orm(column_type = "Json", nullable)]
    pub applicable_categories: Option<Json>,
    /// JSON array of product ids; empty/absent means unrestricted
    #[sea_orm(column_type = "Json", nullable)]
    pub applicable_products: Option<Json>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_redemption::Entity")]
    Redemptions,
}

impl Related<super::coupon_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}
