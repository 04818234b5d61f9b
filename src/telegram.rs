//! Telegram Bot API client
//!
//! Sends messages for the notification channel and long-polls `getUpdates`
//! for operator commands.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::commands::{Command, Controller};
use crate::notify::NotificationChannel;
use crate::types::ChatId;

const API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(anyhow!(
                "Telegram {} failed: {}",
                method,
                self.description.unwrap_or_else(|| "no description".to_string())
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// The token is part of every request URL, so transport errors are stripped
/// of their URL before they can reach the log.
#[derive(Clone)]
pub struct TelegramBot {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramBot {
    pub fn new(token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", API_BASE, token),
        })
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/sendMessage", self.base_url);
        let resp: ApiResponse<serde_json::Value> = self
            .client
            .post(&url)
            .form(&[("chat_id", chat_id.to_string().as_str()), ("text", text)])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("sendMessage request failed")?
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("sendMessage returned an unreadable body")?;

        resp.into_result("sendMessage")?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!("{}/getUpdates", self.base_url);
        let resp: ApiResponse<Vec<Update>> = self
            .client
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("getUpdates request failed")?
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("getUpdates returned an unreadable body")?;

        resp.into_result("getUpdates")
    }

    /// Answers commands until the process exits. Transport errors are logged
    /// and polling resumes after a short pause.
    pub async fn run_commands(&self, controller: &Controller) {
        info!("Listening for Telegram commands");
        let mut offset = 0;

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("Polling Telegram failed: {:#}", e);
                    tokio::time::sleep(POLL_ERROR_PAUSE).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let Some(message) = update.message else {
                    continue;
                };
                let Some(command) = message.text.as_deref().and_then(Command::parse) else {
                    continue;
                };

                let chat = ChatId(message.chat.id);
                debug!(%chat, ?command, "Received command");
                let reply = controller.handle(chat, command);
                if let Err(e) = self.send_message(chat.0, &reply).await {
                    warn!(%chat, "Failed to reply: {:#}", e);
                }
            }
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramBot {
    async fn send(&self, chat: ChatId, text: &str) -> Result<()> {
        self.send_message(chat.0, text).await
    }
}
