// Alert System - Notification of failed groups

pub mod email;

use crate::Result;
use crate::monitor::types::NotificationGroup;
use async_trait::async_trait;

pub use email::EmailNotifier;

/// Notification channel trait - implement this for custom channels
///
/// Called once per completed group that has a recipient and at least one
/// failed check.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a report for `group`
    async fn notify(&self, group: &NotificationGroup) -> Result<()>;

    /// Get the channel name for logging
    fn channel_name(&self) -> &str;
}
