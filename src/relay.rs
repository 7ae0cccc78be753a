use crate::config::{AppConfig, Credentials};
use crate::line::types::{
    FollowEvent, MessageContent, MessageEvent, WebhookEvent, WebhookPayload,
};
use crate::line::LineClient;
use crate::openai::CompletionClient;
use anyhow::Result;
use futures::{stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const CONCURRENCY_LIMIT: usize = 10;

/// What happened to a single webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Follow event answered with the greeting.
    Greeted,

    /// Completion text was sent back.
    Replied,

    /// Completion failed and the fallback text was sent instead.
    RepliedWithError,

    /// Nothing to answer: postbacks, non-text messages, unknown events and
    /// events without a reply token.
    Ignored,

    /// The reply call itself failed, so the user got nothing.
    ReplyFailed,
}

#[derive(Clone)]
pub struct Relay {
    line: LineClient,
    completion: CompletionClient,
    greeting_text: Arc<str>,
    fallback_text: Arc<str>,
}
impl Relay {
    pub fn new(config: &AppConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            line: LineClient::new(&config.line, credentials.channel_access_token.clone())?,
            completion: CompletionClient::new(
                &config.completion,
                credentials.openai_api_key.clone(),
            )?,
            greeting_text: config.line.greeting_text.as_str().into(),
            fallback_text: config.line.fallback_text.as_str().into(),
        })
    }

    /// Handles every event of a verified payload, returning outcomes in
    /// completion order.
    pub async fn handle_payload(&self, payload: WebhookPayload) -> Vec<RelayOutcome> {
        debug!(
            "Handling {} event(s) for destination {:?}",
            payload.events.len(),
            payload.destination
        );

        stream::iter(payload.events)
            .map(|event| self.handle_event(event))
            .buffer_unordered(CONCURRENCY_LIMIT)
            .collect()
            .await
    }

    #[instrument(
        skip(self, event),
        fields(
            kind = event.kind(),
            reply_token = ?event.reply_token(),
            user_id = ?event.user_id()
        )
    )]
    pub async fn handle_event(&self, event: WebhookEvent) -> RelayOutcome {
        match event {
            WebhookEvent::Follow(FollowEvent {
                reply_token: Some(reply_token),
                ..
            }) => {
                info!("New follower, sending greeting");
                self.send(&reply_token, &self.greeting_text, RelayOutcome::Greeted)
                    .await
            }
            WebhookEvent::Message(MessageEvent {
                reply_token: Some(reply_token),
                message: MessageContent::Text { id, text },
                ..
            }) => {
                debug!("Received text message {id:?}");
                self.relay_text(&reply_token, &text).await
            }
            WebhookEvent::Follow(FollowEvent { reply_token: None, .. })
            | WebhookEvent::Message(MessageEvent {
                reply_token: None,
                message: MessageContent::Text { .. },
                ..
            }) => {
                debug!("Ignoring event without a reply token");
                RelayOutcome::Ignored
            }
            WebhookEvent::Message(MessageEvent { source, .. }) => {
                debug!(
                    "Ignoring non-text message from {:?} source",
                    source.map(|s| s.source_type)
                );
                RelayOutcome::Ignored
            }
            WebhookEvent::Postback(postback) => {
                debug!("Ignoring postback: {}", postback.postback.data);
                RelayOutcome::Ignored
            }
            WebhookEvent::Unsupported => {
                debug!("Ignoring unsupported event type");
                RelayOutcome::Ignored
            }
        }
    }

    /// Completion then exactly one reply. A failed completion is never
    /// retried, the reply token would expire first.
    pub async fn relay_text(&self, reply_token: &str, text: &str) -> RelayOutcome {
        match self.completion.complete(text).await {
            Ok(reply) => self.send(reply_token, &reply, RelayOutcome::Replied).await,
            Err(e) => {
                error!("Failed to get completion reply: {e}");
                self.send(reply_token, &self.fallback_text, RelayOutcome::RepliedWithError)
                    .await
            }
        }
    }

    async fn send(&self, reply_token: &str, text: &str, outcome: RelayOutcome) -> RelayOutcome {
        match self.line.reply_text(reply_token, text).await {
            Ok(()) => outcome,
            Err(e) => {
                warn!("Dropping reply, LINE reply call failed: {e}");
                RelayOutcome::ReplyFailed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub const FALLBACK_TEXT: &str = "An error occurred.";

    pub fn test_credentials() -> Credentials {
        Credentials {
            channel_access_token: "test-access-token".to_string(),
            channel_secret: "test-channel-secret".to_string(),
            openai_api_key: "sk-test".to_string(),
        }
    }

    pub fn test_config(line_url: &str, completion_url: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.line.api_base_url = line_url.to_string();
        config.completion.base_url = completion_url.to_string();
        config.completion.timeout_secs = 1;
        config
    }

    pub async fn mount_completion(server: &MockServer, content: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })))
            .mount(server)
            .await;
    }

    pub async fn expect_reply(server: &MockServer, reply_token: &str, text: &str) {
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .and(body_json(json!({
                "replyToken": reply_token,
                "messages": [{"type": "text", "text": text}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(server)
            .await;
    }

    fn parse(payload: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(payload).unwrap()
    }

    fn text_event(reply_token: &str, text: &str) -> serde_json::Value {
        json!({
            "type": "message",
            "replyToken": reply_token,
            "source": {"type": "user", "userId": "U123"},
            "message": {"type": "text", "id": "1", "text": text}
        })
    }

    #[tokio::test]
    async fn test_text_message_is_relayed() {
        let line = MockServer::start().await;
        let completion = MockServer::start().await;
        mount_completion(&completion, "hi there").await;
        expect_reply(&line, "abc", "hi there").await;

        let relay = Relay::new(&test_config(&line.uri(), &completion.uri()), &test_credentials())
            .unwrap();
        let outcomes = relay
            .handle_payload(parse(json!({"events": [text_event("abc", "hello")]})))
            .await;

        assert_eq!(outcomes, vec![RelayOutcome::Replied]);
    }

    #[tokio::test]
    async fn test_follow_is_greeted_without_completion() {
        let line = MockServer::start().await;
        let completion = MockServer::start().await;
        expect_reply(&line, "follow-token", "Thank You!").await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&completion)
            .await;

        let relay = Relay::new(&test_config(&line.uri(), &completion.uri()), &test_credentials())
            .unwrap();
        let outcomes = relay
            .handle_payload(parse(json!({"events": [{
                "type": "follow",
                "replyToken": "follow-token",
                "source": {"type": "user", "userId": "U123"}
            }]})))
            .await;

        assert_eq!(outcomes, vec![RelayOutcome::Greeted]);
    }

    #[tokio::test]
    async fn test_completion_error_sends_fallback() {
        let line = MockServer::start().await;
        let completion = MockServer::start().await;
        expect_reply(&line, "abc", FALLBACK_TEXT).await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(1)
            .mount(&completion)
            .await;

        let relay = Relay::new(&test_config(&line.uri(), &completion.uri()), &test_credentials())
            .unwrap();
        assert_eq!(
            relay.relay_text("abc", "hello").await,
            RelayOutcome::RepliedWithError
        );
    }

    #[tokio::test]
    async fn test_unreachable_completion_sends_fallback() {
        let line = MockServer::start().await;
        expect_reply(&line, "abc", FALLBACK_TEXT).await;

        // Nothing listens on the discard port.
        let relay = Relay::new(
            &test_config(&line.uri(), "http://127.0.0.1:9"),
            &test_credentials(),
        )
        .unwrap();
        assert_eq!(
            relay.relay_text("abc", "hello").await,
            RelayOutcome::RepliedWithError
        );
    }

    #[tokio::test]
    async fn test_ignored_events_send_nothing() {
        let line = MockServer::start().await;
        let completion = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&line)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&completion)
            .await;

        let relay = Relay::new(&test_config(&line.uri(), &completion.uri()), &test_credentials())
            .unwrap();
        let outcomes = relay
            .handle_payload(parse(json!({"events": [
                {
                    "type": "message",
                    "replyToken": "sticker",
                    "source": {"type": "user", "userId": "U123"},
                    "message": {"type": "sticker", "id": "2", "packageId": "1", "stickerId": "1"}
                },
                {
                    "type": "postback",
                    "replyToken": "postback",
                    "postback": {"data": "action=buy"}
                },
                {"type": "unfollow", "source": {"type": "user", "userId": "U123"}}
            ]})))
            .await;

        assert_eq!(outcomes, vec![RelayOutcome::Ignored; 3]);
    }

    #[tokio::test]
    async fn test_events_without_reply_token_are_ignored() {
        let line = MockServer::start().await;
        let completion = MockServer::start().await;
        mount_completion(&completion, "hi there").await;
        expect_reply(&line, "abc", "hi there").await;

        let relay = Relay::new(&test_config(&line.uri(), &completion.uri()), &test_credentials())
            .unwrap();
        let mut outcomes = relay
            .handle_payload(parse(json!({"events": [
                {
                    "type": "message",
                    "mode": "standby",
                    "source": {"type": "user", "userId": "U123"},
                    "message": {"type": "text", "id": "9", "text": "not for us"}
                },
                {
                    "type": "follow",
                    "mode": "standby",
                    "source": {"type": "user", "userId": "U123"}
                },
                text_event("abc", "hello")
            ]})))
            .await;

        outcomes.sort_by_key(|outcome| *outcome == RelayOutcome::Replied);
        assert_eq!(
            outcomes,
            vec![
                RelayOutcome::Ignored,
                RelayOutcome::Ignored,
                RelayOutcome::Replied
            ]
        );
    }

    #[tokio::test]
    async fn test_each_event_gets_its_own_reply() {
        let line = MockServer::start().await;
        let completion = MockServer::start().await;
        mount_completion(&completion, "same answer").await;
        expect_reply(&line, "first", "same answer").await;
        expect_reply(&line, "second", "same answer").await;

        let relay = Relay::new(&test_config(&line.uri(), &completion.uri()), &test_credentials())
            .unwrap();
        let outcomes = relay
            .handle_payload(parse(json!({"events": [
                text_event("first", "one"),
                text_event("second", "two")
            ]})))
            .await;

        assert_eq!(outcomes, vec![RelayOutcome::Replied; 2]);
    }

    #[tokio::test]
    async fn test_failed_reply_is_dropped() {
        let line = MockServer::start().await;
        let completion = MockServer::start().await;
        mount_completion(&completion, "hi there").await;

        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&line)
            .await;

        let relay = Relay::new(&test_config(&line.uri(), &completion.uri()), &test_credentials())
            .unwrap();
        assert_eq!(
            relay.relay_text("expired", "hello").await,
            RelayOutcome::ReplyFailed
        );
    }
}
