use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Outbound customer notifications (confirmation SMS and the like). Failures
/// are always best-effort: callers log and move on, never fail the request.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmation(&self, customer_id: Uuid, order_number: &str)
        -> Result<(), String>;
}

/// Default notifier: records the notification in the logs. A real SMS
/// provider slots in behind the same trait.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_confirmation(
        &self,
        customer_id: Uuid,
        order_number: &str,
    ) -> Result<(), String> {
        info!(%customer_id, order_number, "order confirmation notification");
        Ok(())
    }
}
