pub mod signature;
pub mod types;

use crate::config::LineConfig;
use crate::error::{RelayError, RelayResult};
use crate::line::types::{ReplyMessage, ReplyMessageRequest};
use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, error, instrument};

/// Thin wrapper over the Messaging API reply endpoint.
#[derive(Clone)]
pub struct LineClient {
    http_client: Client,
    reply_url: String,
    channel_access_token: String,
}
impl LineClient {
    pub fn new(config: &LineConfig, channel_access_token: String) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build LINE Reqwest client")?;

        Ok(Self {
            http_client,
            reply_url: format!(
                "{}/v2/bot/message/reply",
                config.api_base_url.trim_end_matches('/')
            ),
            channel_access_token,
        })
    }

    /// Sends `messages` against a reply token. Tokens are single use, so
    /// this is never retried.
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    pub async fn reply(&self, reply_token: &str, messages: Vec<ReplyMessage>) -> RelayResult<()> {
        let request_body = ReplyMessageRequest {
            reply_token: reply_token.to_string(),
            messages,
        };

        let response = self
            .http_client
            .post(&self.reply_url)
            .bearer_auth(&self.channel_access_token)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("Successfully sent reply");
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!("LINE API error: {} - {}", status, error_text);
        Err(RelayError::Messaging(format!("{status}: {error_text}")))
    }

    #[inline]
    pub async fn reply_text(&self, reply_token: &str, text: impl Into<String>) -> RelayResult<()> {
        self.reply(reply_token, vec![ReplyMessage::text(text)]).await
    }
}
