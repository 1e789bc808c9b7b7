mod common;

use common::*;
use dashmart_api::{
    broadcast::{order_topic, partner_topic, ChannelMessage},
    entities::{
        customer::CustomerKind,
        order::{OrderStatus, PaymentMethod},
    },
    errors::ServiceError,
    services::orders::NewOrder,
};
use rust_decimal_macros::dec;
use tokio::sync::broadcast::error::TryRecvError;

fn cod_order() -> NewOrder {
    NewOrder {
        delivery_address: address(),
        payment_method: PaymentMethod::Cod,
        gift_wrap: None,
        payment: None,
    }
}

async fn seeded_order(
    state: &dashmart_api::AppState,
) -> (dashmart_api::entities::order::Model, uuid::Uuid) {
    let customer = seed_customer(state).await;
    let product = seed_product(state, dec!(100), 10).await;
    state
        .services
        .carts
        .add_item(customer.id, CustomerKind::Customer, product.id, 1)
        .await
        .unwrap();
    let order = state
        .services
        .orders
        .create_from_cart(customer.id, CustomerKind::Customer, cod_order())
        .await
        .unwrap();
    (order, customer.id)
}

#[tokio::test]
async fn assignment_confirms_and_notifies_partner() {
    let (state, _) = setup().await;
    let partner = seed_partner(&state, true).await;
    let (order, _) = seeded_order(&state).await;

    let mut partner_rx = state.broadcaster.subscribe(&partner_topic(partner.id));

    let assigned = state
        .services
        .delivery
        .assign(order.id, partner.id)
        .await
        .unwrap();
    assert_eq!(assigned.status, OrderStatus::Confirmed);
    assert_eq!(assigned.delivery_partner_id, Some(partner.id));

    let message = partner_rx.recv().await.unwrap();
    assert_eq!(
        message,
        ChannelMessage::OrderAssigned {
            order_id: order.id,
            order_number: order.order_number.clone(),
            partner_id: partner.id,
        }
    );

    // A second assignment attempt finds the order taken
    let other = seed_partner(&state, true).await;
    let result = state.services.delivery.assign(order.id, other.id).await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn unavailable_partner_cannot_be_assigned() {
    let (state, _) = setup().await;
    let partner = seed_partner(&state, false).await;
    let (order, _) = seeded_order(&state).await;

    let result = state.services.delivery.assign(order.id, partner.id).await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
    assert_eq!(
        state.services.orders.get(order.id).await.unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn only_the_assigned_partner_advances_the_order() {
    let (state, _) = setup().await;
    let partner = seed_partner(&state, true).await;
    let intruder = seed_partner(&state, true).await;
    let (order, _) = seeded_order(&state).await;

    state
        .services
        .delivery
        .assign(order.id, partner.id)
        .await
        .unwrap();

    let result = state
        .services
        .delivery
        .partner_update_status(order.id, intruder.id, OrderStatus::Picked)
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));

    let ok = state
        .services
        .delivery
        .partner_update_status(order.id, partner.id, OrderStatus::Picked)
        .await
        .unwrap();
    assert_eq!(ok.status, OrderStatus::Picked);

    // Skipping ahead is rejected by the lifecycle rules
    let skip = state
        .services
        .delivery
        .partner_update_status(order.id, partner.id, OrderStatus::Delivered)
        .await;
    assert!(matches!(skip, Err(ServiceError::InvalidTransition { .. })));
}

#[tokio::test]
async fn location_fans_out_only_to_orders_in_transit() {
    let (state, _) = setup().await;
    let partner = seed_partner(&state, true).await;
    let (order, _) = seeded_order(&state).await;

    state
        .services
        .delivery
        .assign(order.id, partner.id)
        .await
        .unwrap();
    let mut order_rx = state.broadcaster.subscribe(&order_topic(order.id));

    // Confirmed but not picked: watchers hear nothing
    let notified = state
        .services
        .delivery
        .report_location(partner.id, 12.9716, 77.5946)
        .await
        .unwrap();
    assert_eq!(notified, 0);
    assert!(matches!(order_rx.try_recv(), Err(TryRecvError::Empty)));

    state
        .services
        .delivery
        .partner_update_status(order.id, partner.id, OrderStatus::Picked)
        .await
        .unwrap();
    // Drain the status-change frame
    let status_frame = order_rx.recv().await.unwrap();
    assert_eq!(
        status_frame,
        ChannelMessage::StatusChanged {
            order_id: order.id,
            status: "picked".into()
        }
    );

    let notified = state
        .services
        .delivery
        .report_location(partner.id, 12.9720, 77.5950)
        .await
        .unwrap();
    assert_eq!(notified, 1);
    let location_frame = order_rx.recv().await.unwrap();
    assert_eq!(
        location_frame,
        ChannelMessage::LocationUpdate {
            partner_id: partner.id,
            latitude: 12.9720,
            longitude: 77.5950,
        }
    );
}

#[tokio::test]
async fn out_of_range_coordinates_are_rejected() {
    let (state, _) = setup().await;
    let partner = seed_partner(&state, true).await;

    for (lat, lon) in [(91.0, 0.0), (-91.0, 0.0), (0.0, 181.0), (0.0, -181.0)] {
        let result = state
            .services
            .delivery
            .report_location(partner.id, lat, lon)
            .await;
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }
}

#[tokio::test]
async fn publishing_to_topic_without_subscribers_is_a_noop() {
    let (state, _) = setup().await;
    let partner = seed_partner(&state, true).await;
    let (order, _) = seeded_order(&state).await;

    // No subscriber on the partner or order topic; assignment still works
    let assigned = state.services.delivery.assign(order.id, partner.id).await;
    assert!(assigned.is_ok());
}

#[tokio::test]
async fn availability_toggle_is_persisted() {
    let (state, _) = setup().await;
    let partner = seed_partner(&state, true).await;

    let updated = state
        .services
        .delivery
        .set_availability(partner.id, false)
        .await
        .unwrap();
    assert!(!updated.is_available);

    let (order, _) = seeded_order(&state).await;
    let result = state.services.delivery.assign(order.id, partner.id).await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}
