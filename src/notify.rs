use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::types::{ChatId, Course};

/// Anything that can deliver a text message to a chat.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, chat: ChatId, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans a change summary out to every recipient. Best effort: a failed
/// delivery is logged and does not affect the others.
#[derive(Clone)]
pub struct Dispatcher {
    channel: Arc<dyn NotificationChannel>,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    pub async fn notify(&self, changed: &[Course], recipients: &[ChatId]) -> DispatchReport {
        if changed.is_empty() || recipients.is_empty() {
            return DispatchReport::default();
        }

        let msg = format_changes(changed);
        let sends = recipients.iter().map(|chat| {
            let msg = msg.as_str();
            async move { (*chat, self.channel.send(*chat, msg).await) }
        });

        let mut report = DispatchReport::default();
        for (chat, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(%chat, "Failed to deliver notification: {:#}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Notifications sent"
        );
        report
    }
}

pub fn format_changes(changed: &[Course]) -> String {
    format!(
        "New grades posted!\n{}",
        changed
            .iter()
            .map(|c| format!(" - {}", c.name))
            .collect::<Vec<_>>()
            .join("\n")
    )
}
