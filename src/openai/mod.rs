pub mod types;

use crate::config::CompletionConfig;
use crate::error::CompletionError;
use crate::openai::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, instrument};

/// Stateless chat-completion client. Every call is a fresh two message
/// conversation: the system prompt and the user's text.
#[derive(Clone)]
pub struct CompletionClient {
    http_client: Client,
    completions_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}
impl CompletionClient {
    pub fn new(config: &CompletionConfig, api_key: String) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build completion Reqwest client")?;

        Ok(Self {
            http_client,
            completions_url: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// Get a reply for `user_message` from the first returned choice.
    #[instrument(skip(self, user_message), fields(model = %self.model))]
    pub async fn complete(&self, user_message: &str) -> Result<String, CompletionError> {
        let request_body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage::system(self.system_prompt.as_str()),
                ChatMessage::user(user_message),
            ],
        };

        debug!("Sending request to completion API");
        let response = self
            .http_client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CompletionError::Status { status, body });
        }

        let completion = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| CompletionError::Parse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::NoChoices)?
            .message
            .content
            .unwrap_or_default();

        let content = content.trim();
        if content.is_empty() {
            return Err(CompletionError::EmptyContent);
        }

        debug!("Successfully received completion");
        Ok(content.to_string())
    }
}
