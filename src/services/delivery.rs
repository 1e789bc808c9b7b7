use crate::{
    broadcast::{self, Broadcaster, ChannelMessage},
    entities::{
        delivery_partner, order,
        order::OrderStatus,
        DeliveryPartner, Order,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{record_history, OrderService},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Assignment of orders to delivery partners and live location fan-out.
#[derive(Clone)]
pub struct DeliveryService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    events: EventSender,
    broadcaster: Arc<Broadcaster>,
}

impl DeliveryService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        events: EventSender,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            db,
            orders,
            events,
            broadcaster,
        }
    }

    pub async fn get_partner(
        &self,
        partner_id: Uuid,
    ) -> Result<delivery_partner::Model, ServiceError> {
        DeliveryPartner::find_by_id(partner_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Delivery partner not found".into()))
    }

    /// Assigns a pending, unassigned order to an available partner and
    /// confirms it. The update is conditional on both facts, so two
    /// dispatchers assigning the same order race safely.
    #[instrument(skip(self))]
    pub async fn assign(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let partner = self.get_partner(partner_id).await?;
        if !partner.is_available {
            return Err(ServiceError::Conflict(format!(
                "Partner {} is not available",
                partner.name
            )));
        }

        // Existence check; also produces 404 before the conflict path.
        let order = self.orders.get(order_id).await?;

        let result = Order::update_many()
            .col_expr(
                order::Column::DeliveryPartnerId,
                Expr::value(Some(partner_id)),
            )
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Confirmed))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::DeliveryPartnerId.is_null())
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order is not assignable (status {})",
                order.status
            )));
        }

        record_history(&*self.db, order_id, OrderStatus::Confirmed, "ops").await?;

        info!(%order_id, %partner_id, "order assigned");
        self.events
            .send_or_log(Event::PartnerAssigned {
                order_id,
                partner_id,
            })
            .await;
        let message = ChannelMessage::OrderAssigned {
            order_id,
            order_number: order.order_number.clone(),
            partner_id,
        };
        self.broadcaster
            .publish(&broadcast::partner_topic(partner_id), message.clone());
        self.broadcaster.publish(broadcast::OPS_TOPIC, message);
        self.broadcaster.publish(
            &broadcast::order_topic(order_id),
            ChannelMessage::StatusChanged {
                order_id,
                status: OrderStatus::Confirmed.to_string(),
            },
        );

        self.orders.get(order_id).await
    }

    /// Status change driven by the assigned partner. Anyone else gets 403;
    /// the lifecycle rules themselves are enforced by the order service.
    pub async fn partner_update_status(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        next: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = self.orders.get(order_id).await?;
        if order.delivery_partner_id != Some(partner_id) {
            return Err(ServiceError::Forbidden(
                "Order is not assigned to this partner".into(),
            ));
        }
        self.orders.transition(order_id, next, "partner").await
    }

    /// Records the partner's position and fans it out to the watchers of
    /// every order that partner is actively carrying. Orders that are not
    /// yet picked, or already delivered, receive nothing.
    #[instrument(skip(self))]
    pub async fn report_location(
        &self,
        partner_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<usize, ServiceError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(ServiceError::ValidationError(
                "Coordinates out of range".into(),
            ));
        }

        let updated = DeliveryPartner::update_many()
            .col_expr(
                delivery_partner::Column::LastLatitude,
                Expr::value(Some(latitude)),
            )
            .col_expr(
                delivery_partner::Column::LastLongitude,
                Expr::value(Some(longitude)),
            )
            .col_expr(
                delivery_partner::Column::LocationUpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(delivery_partner::Column::Id.eq(partner_id))
            .exec(&*self.db)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::NotFound("Delivery partner not found".into()));
        }

        let carrying = Order::find()
            .filter(order::Column::DeliveryPartnerId.eq(partner_id))
            .filter(order::Column::Status.is_in([OrderStatus::Picked, OrderStatus::Arriving]))
            .all(&*self.db)
            .await?;

        for order in &carrying {
            self.broadcaster.publish(
                &broadcast::order_topic(order.id),
                ChannelMessage::LocationUpdate {
                    partner_id,
                    latitude,
                    longitude,
                },
            );
        }
        self.events
            .send_or_log(Event::PartnerLocationUpdated {
                partner_id,
                latitude,
                longitude,
            })
            .await;
        Ok(carrying.len())
    }

    pub async fn set_availability(
        &self,
        partner_id: Uuid,
        is_available: bool,
    ) -> Result<delivery_partner::Model, ServiceError> {
        let updated = DeliveryPartner::update_many()
            .col_expr(
                delivery_partner::Column::IsAvailable,
                Expr::value(is_available),
            )
            .filter(delivery_partner::Column::Id.eq(partner_id))
            .exec(&*self.db)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::NotFound("Delivery partner not found".into()));
        }

        self.events
            .send_or_log(Event::PartnerAvailabilityChanged {
                partner_id,
                is_available,
            })
            .await;
        self.get_partner(partner_id).await
    }
}
