pub mod carts;
pub mod delivery;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod sequences;
pub mod stock;

use std::sync::Arc;

/// Bundle of constructed services hung off the application state.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<carts::CartService>,
    pub pricing: Arc<pricing::PricingService>,
    pub orders: Arc<orders::OrderService>,
    pub payments: Arc<payments::PaymentService>,
    pub delivery: Arc<delivery::DeliveryService>,
}
