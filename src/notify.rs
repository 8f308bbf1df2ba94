//! Outcome notifications.
//!
//! The engine treats notifiers as fire-and-forget: an `Err` is logged and
//! never changes the outcome being reported.

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::settings::SettingsStore;
use crate::types::UpdateApplyResult;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_update_notification(
        &self,
        container_name: &str,
        outcome: &UpdateApplyResult,
    ) -> anyhow::Result<()>;
}

/// Writes outcomes to the log when notifications are enabled.
pub struct LogNotifier {
    settings: Arc<SettingsStore>,
}

impl LogNotifier {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_update_notification(
        &self,
        container_name: &str,
        outcome: &UpdateApplyResult,
    ) -> anyhow::Result<()> {
        if !self.settings.get_all().await.notifications_enabled {
            return Ok(());
        }

        let text = outcome
            .message
            .as_deref()
            .or(outcome.error.as_deref())
            .unwrap_or("No message provided");
        if outcome.success {
            info!(
                "[notify] {} updated ({}): {}",
                container_name,
                outcome.image.as_deref().unwrap_or("N/A"),
                text
            );
        } else {
            warn!("[notify] {} update FAILED: {}", container_name, text);
        }
        Ok(())
    }
}
