//! The push channel to an owning client.

use async_trait::async_trait;

/// Fire-and-forget delivery of a named event to one owner.
///
/// Implementations must not surface delivery failures to the engine; they
/// log and drop. No delivery guarantee is assumed by callers.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short name used in logs (`"ws"`, `"webhook"`).
    fn name(&self) -> &'static str;

    async fn send(&self, owner_id: &str, event_name: &str, payload: &serde_json::Value);
}
