//! Operator API: ad-hoc sends, manual scheduler ticks, settings.
//!
//! All mutating routes require the configured bearer token. When no token
//! is configured the API is open, which is only acceptable for local
//! development.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::dispatch::{Dispatcher, OutboundSms};
use crate::scheduler::CampaignEngine;
use crate::store::{AUTO_SEND_SETTING, Database, LedgerMessage};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Database>,
    pub dispatcher: Dispatcher,
    pub engine: CampaignEngine,
    pub api_token: Option<String>,
}

/// Build the operator API router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/test-send", post(test_send))
        .route("/api/messages/send", post(send_to_user))
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/scheduler/tick", post(run_tick))
        .route("/api/settings/auto-send", post(set_auto_send))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct SendResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SendResponse {
    fn sent(message_id: String) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    fn failed(message_id: Option<String>, error: String) -> Self {
        Self {
            success: false,
            message_id,
            error: Some(error),
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"success": false, "error": "unauthorized"})),
    )
        .into_response()
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.api_token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.store.list_recent_messages(query.limit.min(500)).await {
        Ok(messages) => Json(messages.iter().map(message_summary).collect::<Vec<_>>()).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list messages");
            (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
        }
    }
}

fn message_summary(m: &LedgerMessage) -> serde_json::Value {
    serde_json::json!({
        "id": m.id,
        "direction": m.direction.as_str(),
        "to": m.to,
        "from": m.from,
        "body": m.body,
        "status": m.status.as_str(),
        "error": m.error,
        "external_id": m.external_id,
        "created_at": m.created_at.to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
struct TestSendRequest {
    to: String,
    body: String,
}

/// Send to an explicit phone number, bypassing user lookup.
async fn test_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TestSendRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }

    let sms = OutboundSms::new(&req.to, &req.body)
        .with_metadata(serde_json::json!({"source": "test_send"}));
    dispatch_and_respond(&state, sms).await
}

#[derive(Debug, Deserialize)]
struct UserSendRequest {
    user_id: String,
    body: String,
}

/// Send to a user's stored phone number.
async fn send_to_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UserSendRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }

    let recipients = match state
        .store
        .resolve_recipients(std::slice::from_ref(&req.user_id))
        .await
    {
        Ok(recipients) => recipients,
        Err(e) => {
            error!(error = %e, "Recipient lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response();
        }
    };

    let Some(recipient) = recipients.into_iter().next() else {
        return (
            StatusCode::NOT_FOUND,
            Json(SendResponse::failed(
                None,
                format!("no phone number on file for user {}", req.user_id),
            )),
        )
            .into_response();
    };

    let sms = OutboundSms::new(&recipient.phone_number, &req.body)
        .with_user(&recipient.user_id)
        .with_metadata(serde_json::json!({"source": "api"}));
    dispatch_and_respond(&state, sms).await
}

async fn dispatch_and_respond(state: &AppState, sms: OutboundSms) -> Response {
    match state.dispatcher.send_sms(sms).await {
        Ok(outcome) => match outcome.result {
            Ok(_) => Json(SendResponse::sent(outcome.message_id)).into_response(),
            Err(e) => (
                StatusCode::BAD_GATEWAY,
                Json(SendResponse::failed(Some(outcome.message_id), e.to_string())),
            )
                .into_response(),
        },
        Err(e) => {
            error!(error = %e, "Dispatch failed before carrier call");
            (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
        }
    }
}

async fn list_campaigns(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.store.list_active_campaigns().await {
        Ok(campaigns) => Json(campaigns).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list campaigns");
            (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
        }
    }
}

async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<crate::scheduler::NewCampaign>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.store.create_campaign(&req).await {
        Ok(campaign) => (StatusCode::CREATED, Json(campaign)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to create campaign");
            // Unique template_name collisions land here too
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Trigger one scheduler pass immediately.
async fn run_tick(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    match state.engine.tick().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, "Manual tick failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "tick failed").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct AutoSendRequest {
    enabled: bool,
}

async fn set_auto_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AutoSendRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let value = if req.enabled { "true" } else { "false" };
    match state.store.set_setting(AUTO_SEND_SETTING, value).await {
        Ok(()) => Json(serde_json::json!({"success": true, "enabled": req.enabled})).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to update auto-send setting");
            (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    use crate::carrier::mock::MockCarrier;
    use crate::store::LibSqlBackend;

    async fn state_with_token(token: Option<&str>) -> AppState {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(MockCarrier::new()));
        let engine = CampaignEngine::new(store.clone(), dispatcher.clone(), Duration::from_secs(120));
        AppState {
            store,
            dispatcher,
            engine,
            api_token: token.map(String::from),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn token_is_required_when_configured() {
        let state = state_with_token(Some("secret")).await;

        assert!(!authorized(&state, &HeaderMap::new()));
        assert!(!authorized(&state, &bearer("wrong")));
        assert!(authorized(&state, &bearer("secret")));
    }

    #[tokio::test]
    async fn missing_token_config_leaves_api_open() {
        let state = state_with_token(None).await;
        assert!(authorized(&state, &HeaderMap::new()));
    }

    #[tokio::test]
    async fn send_to_unknown_user_is_not_found() {
        let state = state_with_token(None).await;
        let response = send_to_user(
            State(state),
            HeaderMap::new(),
            Json(UserSendRequest {
                user_id: "ghost".to_string(),
                body: "hello".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_to_known_user_uses_stored_number() {
        let state = state_with_token(None).await;
        state.store.set_phone_number("u1", Some("+15551234567")).await.unwrap();

        let response = send_to_user(
            State(state.clone()),
            HeaderMap::new(),
            Json(UserSendRequest {
                user_id: "u1".to_string(),
                body: "hello".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let messages = state.store.list_recent_messages(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, "+15551234567");
        assert_eq!(messages[0].user_id.as_deref(), Some("u1"));
    }
}
