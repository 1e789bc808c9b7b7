pub mod auth;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod services;

use crate::{
    broadcast::Broadcaster,
    config::AppConfig,
    events::EventSender,
    services::{
        carts::CartService,
        delivery::DeliveryService,
        orders::OrderService,
        payments::{PaymentGateway, PaymentService},
        pricing::PricingService,
        AppServices,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub services: AppServices,
    pub event_sender: EventSender,
    pub broadcaster: Arc<Broadcaster>,
}

/// Wires the service graph in dependency order. The payment gateway is a
/// parameter so tests can substitute a mock for the HTTP client.
pub fn build_state(
    db: DatabaseConnection,
    config: AppConfig,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    broadcaster: Arc<Broadcaster>,
) -> Arc<AppState> {
    let db = Arc::new(db);

    let pricing = Arc::new(PricingService::new(db.clone(), config.pricing.clone()));
    let carts = Arc::new(CartService::new(db.clone(), pricing.clone()));
    let orders = Arc::new(OrderService::new(
        db.clone(),
        carts.clone(),
        pricing.clone(),
        event_sender.clone(),
        broadcaster.clone(),
    ));
    let payments = Arc::new(PaymentService::new(
        db.clone(),
        config.gateway.clone(),
        gateway,
        orders.clone(),
        carts.clone(),
        pricing.clone(),
        event_sender.clone(),
        broadcaster.clone(),
    ));
    let delivery = Arc::new(DeliveryService::new(
        db.clone(),
        orders.clone(),
        event_sender.clone(),
        broadcaster.clone(),
    ));

    Arc::new(AppState {
        db,
        config,
        services: AppServices {
            carts,
            pricing,
            orders,
            payments,
            delivery,
        },
        event_sender,
        broadcaster,
    })
}
