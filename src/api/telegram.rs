use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Notifier;
use crate::{Error, Result};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Sends operator messages to a Telegram chat
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Result<Self> {
        Self::with_base_url(token, chat_id, TELEGRAM_API_BASE)
    }

    pub fn with_base_url(token: String, chat_id: String, base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            token,
            chat_id,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response: TelegramResponse = self.client.post(&url).json(&body).send().await?.json().await?;

        if !response.ok {
            return Err(Error::Notification(
                response
                    .description
                    .unwrap_or_else(|| "telegram rejected message".to_string()),
            ));
        }

        Ok(())
    }
}
