use crate::broadcast::{Broadcaster, ChannelMessage, OPS_TOPIC};
use crate::services::notifications::Notifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the domain services onto the internal bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
    },
    PaymentVerified {
        gateway_order_id: String,
        gateway_payment_id: String,
    },
    PaymentCaptured {
        order_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
    },
    PaymentRefunded {
        order_id: Uuid,
    },
    StockReserved {
        product_id: Uuid,
        quantity: i32,
    },
    StockReleased {
        product_id: Uuid,
        quantity: i32,
    },
    CouponRedeemed {
        code: String,
        order_id: Uuid,
    },
    PartnerAssigned {
        order_id: Uuid,
        partner_id: Uuid,
    },
    PartnerLocationUpdated {
        partner_id: Uuid,
        latitude: f64,
        longitude: f64,
    },
    PartnerAvailabilityChanged {
        partner_id: Uuid,
        is_available: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Best-effort send. Event delivery failures are logged, never propagated
    /// into request results.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping event");
        }
    }
}

/// Consumes the internal event stream: mirrors order/payment activity onto the
/// operations dashboard topic and fires best-effort customer notifications.
pub async fn process_events(
    mut rx: mpsc::Receiver<Event>,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<dyn Notifier>,
) {
    info!("starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                order_number,
                customer_id,
            } => {
                broadcaster.publish(
                    OPS_TOPIC,
                    ChannelMessage::NewOrder {
                        order_id,
                        order_number: order_number.clone(),
                    },
                );
                if let Err(e) = notifier
                    .order_confirmation(customer_id, &order_number)
                    .await
                {
                    warn!(%order_id, error = %e, "order confirmation notification failed");
                }
            }
            Event::OrderCancelled { order_id, reason } => {
                broadcaster.publish(OPS_TOPIC, ChannelMessage::OrderCancelled { order_id, reason });
            }
            Event::PaymentCaptured { order_id } => {
                broadcaster.publish(
                    OPS_TOPIC,
                    ChannelMessage::PaymentEvent {
                        order_id,
                        status: "success".into(),
                    },
                );
            }
            Event::PaymentFailed { order_id } => {
                broadcaster.publish(
                    OPS_TOPIC,
                    ChannelMessage::PaymentEvent {
                        order_id,
                        status: "failed".into(),
                    },
                );
            }
            Event::PaymentRefunded { order_id } => {
                broadcaster.publish(
                    OPS_TOPIC,
                    ChannelMessage::PaymentEvent {
                        order_id,
                        status: "refunded".into(),
                    },
                );
            }
            Event::PartnerAvailabilityChanged {
                partner_id,
                is_available,
            } => {
                broadcaster.publish(
                    OPS_TOPIC,
                    ChannelMessage::PartnerAvailability {
                        partner_id,
                        is_available,
                    },
                );
            }
            // High-frequency; kept off the info log
            Event::PartnerLocationUpdated { partner_id, .. } => {
                tracing::debug!(%partner_id, "partner location updated");
            }
            other => {
                info!(event = ?other, "event recorded");
            }
        }
    }

    warn!("event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifications::LogNotifier;

    #[tokio::test]
    async fn order_created_reaches_ops_dashboard() {
        let broadcaster = Arc::new(Broadcaster::new(16));
        let mut ops_rx = broadcaster.subscribe(OPS_TOPIC);

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(process_events(
            rx,
            broadcaster.clone(),
            Arc::new(LogNotifier),
        ));

        let order_id = Uuid::new_v4();
        EventSender::new(tx.clone())
            .send(Event::OrderCreated {
                order_id,
                order_number: "ORD-000007".into(),
                customer_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let message = ops_rx.recv().await.unwrap();
        assert_eq!(
            message,
            ChannelMessage::NewOrder {
                order_id,
                order_number: "ORD-000007".into()
            }
        );

        drop(tx);
        handle.await.unwrap();
    }
}
