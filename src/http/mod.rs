mod routes;
mod types;

use crate::http::routes::*;
use crate::http::types::HttpError;
use crate::line::signature::SignatureVerifier;
use crate::relay::Relay;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::any::Any;
#[cfg(feature = "sentry")]
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

#[cfg(feature = "sentry")]
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};

#[derive(Clone)]
pub struct HttpState {
    pub verifier: SignatureVerifier,
    pub relay: Relay,
}

pub fn create_app(verifier: SignatureVerifier, relay: Relay, _sentry: bool) -> axum::Router {
    #[cfg_attr(not(feature = "sentry"), allow(unused_mut))]
    let mut router = with_common_layers(
        axum::Router::new()
            .route("/", get(index))
            .route("/callback", post(callback)),
    );

    // If Sentry is enabled, include axum integration layers.
    #[cfg(feature = "sentry")]
    if _sentry {
        tracing::debug!("Adding Sentry HTTP layer!");
        router = router
            .layer(
                ServiceBuilder::new()
                    .layer(NewSentryLayer::<axum::http::Request<axum::body::Body>>::new_from_top()),
            )
            .layer(ServiceBuilder::new().layer(SentryHttpLayer::new().enable_transaction()))
    }

    // Shared HTTP route state.
    let state = HttpState { verifier, relay };
    router.with_state(state)
}

/// Panics become a generic 500 instead of a dropped connection.
fn with_common_layers<S>(router: axum::Router<S>) -> axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-version"),
            HeaderValue::from_static(crate::VERSION),
        ))
        .layer(TraceLayer::new_for_http())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("Unknown panic");

    error!("HTTP handler panicked: {detail}");
    HttpError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "Internal server error".to_string(),
    }
    .into_response()
}
