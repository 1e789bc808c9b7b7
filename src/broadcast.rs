use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Topic receiving new orders, cancellations, payment events and partner
/// availability changes for the operations dashboard.
pub const OPS_TOPIC: &str = "ops-dashboard";

pub fn order_topic(order_id: Uuid) -> String {
    format!("order:{order_id}")
}

pub fn partner_topic(partner_id: Uuid) -> String {
    format!("partner:{partner_id}")
}

/// Message pushed over a real-time topic. Delivery is fire-and-forget and
/// at-least-once; clients recover current state through plain queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    NewOrder {
        order_id: Uuid,
        order_number: String,
    },
    OrderAssigned {
        order_id: Uuid,
        order_number: String,
        partner_id: Uuid,
    },
    StatusChanged {
        order_id: Uuid,
        status: String,
    },
    LocationUpdate {
        partner_id: Uuid,
        latitude: f64,
        longitude: f64,
    },
    PaymentEvent {
        order_id: Uuid,
        status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
    },
    PartnerAvailability {
        partner_id: Uuid,
        is_available: bool,
    },
}

/// Topic-keyed fan-out hub. Constructed once at startup and injected into
/// every component that publishes; never looked up from global state.
///
/// Publishing to a topic nobody has joined is a no-op, not an error. Ordering
/// is guaranteed per topic only.
#[derive(Debug)]
pub struct Broadcaster {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<ChannelMessage>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: DashMap::new(),
        }
    }

    /// Joins a topic, creating it on first subscription.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<ChannelMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publishes to a topic. Returns the number of subscribers reached;
    /// dead topics are pruned on the way out.
    pub fn publish(&self, topic: &str, message: ChannelMessage) -> usize {
        let reached = match self.topics.get(topic) {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        };
        if reached == 0 {
            self.topics
                .remove_if(topic, |_, sender| sender.receiver_count() == 0);
        }
        reached
    }
}
