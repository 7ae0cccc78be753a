use serde::{Deserialize, Serialize};

/// LINE rejects text messages longer than this many characters.
pub const MAX_TEXT_LENGTH: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    /// Bot user ID that received the events.
    #[serde(default)]
    pub destination: Option<String>,

    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookEvent {
    Follow(FollowEvent),
    Message(MessageEvent),
    Postback(PostbackEvent),

    /// Unfollow, join, beacon etc. Parsed so that one unknown event
    /// does not fail the whole batch.
    #[serde(other)]
    Unsupported,
}
impl WebhookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::Follow(_) => "follow",
            WebhookEvent::Message(_) => "message",
            WebhookEvent::Postback(_) => "postback",
            WebhookEvent::Unsupported => "unsupported",
        }
    }

    pub fn reply_token(&self) -> Option<&str> {
        match self {
            WebhookEvent::Follow(e) => e.reply_token.as_deref(),
            WebhookEvent::Message(e) => e.reply_token.as_deref(),
            WebhookEvent::Postback(e) => e.reply_token.as_deref(),
            WebhookEvent::Unsupported => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        let source = match self {
            WebhookEvent::Follow(e) => e.source.as_ref(),
            WebhookEvent::Message(e) => e.source.as_ref(),
            WebhookEvent::Postback(e) => e.source.as_ref(),
            WebhookEvent::Unsupported => None,
        };
        source.and_then(|s| s.user_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEvent {
    /// Absent for events that cannot be replied to, e.g. `mode: "standby"`.
    #[serde(default)]
    pub reply_token: Option<String>,

    #[serde(default)]
    pub source: Option<EventSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// Absent for events that cannot be replied to, e.g. `mode: "standby"`.
    #[serde(default)]
    pub reply_token: Option<String>,

    #[serde(default)]
    pub source: Option<EventSource>,

    pub message: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostbackEvent {
    /// Absent for events that cannot be replied to, e.g. `mode: "standby"`.
    #[serde(default)]
    pub reply_token: Option<String>,

    #[serde(default)]
    pub source: Option<EventSource>,

    pub postback: PostbackContent,
}

#[derive(Debug, Deserialize)]
pub struct PostbackContent {
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub source_type: String,

    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text {
        #[serde(default)]
        id: Option<String>,
        text: String,
    },

    /// Stickers, images, audio and friends.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplyMessage {
    Text { text: String },
}
impl ReplyMessage {
    /// Builds a text message, cut down to what LINE accepts.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let text = match text.char_indices().nth(MAX_TEXT_LENGTH) {
            Some((idx, _)) => text[..idx].to_string(),
            None => text,
        };
        ReplyMessage::Text { text }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessageRequest {
    pub reply_token: String,
    pub messages: Vec<ReplyMessage>,
}
