//! Carrier webhook surface.

pub mod inbound;
pub mod triggers;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tracing::{error, warn};

pub use inbound::{InboundOutcome, InboundProcessor, InboundSms};

/// Empty TwiML document; acknowledges the webhook without queuing a reply
/// through the webhook response itself.
const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// Build the webhook router.
pub fn routes(processor: InboundProcessor) -> Router {
    Router::new()
        .route("/webhooks/sms", post(handle_inbound_sms))
        .with_state(processor)
}

fn twiml_ok() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        EMPTY_TWIML,
    )
        .into_response()
}

/// Twilio posts form-encoded payloads; JSON is accepted for tooling and
/// tests. Unparseable bodies get a 400 so the carrier surfaces missing
/// fields instead of silently retrying.
async fn handle_inbound_sms(
    State(processor): State<InboundProcessor>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let parsed: Result<InboundSms, String> = if content_type.starts_with("application/json") {
        serde_json::from_str(&body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_str(&body).map_err(|e| e.to_string())
    };

    let inbound = match parsed {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(error = %e, "Rejected malformed webhook payload");
            return (StatusCode::BAD_REQUEST, format!("invalid payload: {e}")).into_response();
        }
    };

    match processor.process(&inbound).await {
        // Duplicates get the same 200 as first deliveries; anything else
        // would make the carrier keep retrying a message we already have.
        Ok(_) => twiml_ok(),
        Err(e) => {
            error!(external_id = %inbound.message_sid, error = %e, "Webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "processing failed").into_response()
        }
    }
}
