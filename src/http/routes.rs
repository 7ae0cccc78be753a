use crate::error::RelayError;
use crate::http::types::HttpResult;
use crate::http::HttpState;
use crate::line::signature::SIGNATURE_HEADER;
use crate::line::types::WebhookPayload;
use crate::relay::RelayOutcome;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use tracing::{debug, error, info, warn};

pub async fn index() -> &'static str {
    "Hello world!"
}

pub async fn callback(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult<&'static str> {
    debug!("Webhook request body: {}", String::from_utf8_lossy(&body));

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = state.verifier.verify(&body, signature) {
        warn!("Rejecting webhook: {e}. Check the channel access token / channel secret.");
        return Err(e.into());
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        let e = RelayError::from(e);
        error!("An error occurred during webhook handling: {e}");
        e
    })?;

    let outcomes = state.relay.handle_payload(payload).await;
    let failed = outcomes
        .iter()
        .filter(|outcome| **outcome == RelayOutcome::ReplyFailed)
        .count();

    info!(
        "Handled {} webhook event(s), {} reply failure(s)",
        outcomes.len(),
        failed
    );
    Ok("OK")
}
