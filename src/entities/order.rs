use super::customer::CustomerKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The settlement aggregate. Immutable once created except for `status`, the
/// payment sub-fields, and the delivery assignment; every status change is
/// mirrored into `order_status_history`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-readable sequential identifier, e.g. ORD-000042
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_id: Uuid,
    pub customer_kind: CustomerKind,
    pub status: OrderStatus,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub items_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub delivery_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub gift_wrap_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_price: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// One settled order per gateway payment intent; the unique index is the
    /// backstop behind the idempotent verify path.
    #[sea_orm(unique, nullable)]
    pub gateway_order_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_payment_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_signature: Option<String>,
    #[sea_orm(nullable)]
    pub payment_verified_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub delivery_address: Json,
    #[sea_orm(nullable)]
    pub delivery_partner_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub cancellation_reason: Option<String>,
    #[sea_orm(nullable)]
    pub cancelled_by: Option<String>,
    #[sea_orm(nullable)]
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::delivery_partner::Entity",
        from = "Column::DeliveryPartnerId",
        to = "super::delivery_partner::Column::Id"
    )]
    DeliveryPartner,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::delivery_partner::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeliveryPartner.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Delivery lifecycle: pending → confirmed → picked → arriving → delivered,
/// with pending|confirmed → cancelled as the only side branch. No skips.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "picked")]
    Picked,
    #[sea_orm(string_value = "arriving")]
    Arriving,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Picked => "picked",
            Self::Arriving => "arriving",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Orders in these states are actively being carried by a partner and
    /// receive live location fan-out.
    pub fn is_in_transit(&self) -> bool {
        matches!(self, Self::Picked | Self::Arriving)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Picked)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Picked, Self::Arriving)
                | (Self::Arriving, Self::Delivered)
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cod")]
    Cod,
    #[sea_orm(string_value = "online")]
    Online,
}
