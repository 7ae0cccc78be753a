use reqwest::StatusCode;

/// Failures surfaced while handling one webhook request.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("Missing X-Line-Signature header")]
    MissingSignature,
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("Messaging API error: {0}")]
    Messaging(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}
impl RelayError {
    /// Signature failures are the caller's fault, everything else is ours.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingSignature | RelayError::InvalidSignature => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[inline]
    pub fn is_signature_error(&self) -> bool {
        self.status() == StatusCode::BAD_REQUEST
    }
}

/// Failures from the chat-completion endpoint. These never reach the webhook
/// caller, they are converted into the fallback reply.
#[derive(thiserror::Error, Debug)]
pub enum CompletionError {
    #[error("Completion API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Completion API response could not be parsed: {0}")]
    Parse(String),
    #[error("Completion API returned no choices")]
    NoChoices,
    #[error("Completion API returned an empty message")]
    EmptyContent,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RelayError::MissingSignature.status(), StatusCode::BAD_REQUEST);
        assert_eq!(RelayError::InvalidSignature.status(), StatusCode::BAD_REQUEST);
        assert!(RelayError::InvalidSignature.is_signature_error());

        let parse_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let malformed = RelayError::from(parse_error);
        assert_eq!(malformed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!malformed.is_signature_error());

        assert_eq!(
            RelayError::Messaging("401 Unauthorized".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
