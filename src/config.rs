//! Configuration types — carrier credentials and service settings.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Twilio carrier credentials and sender identity.
///
/// Sender identity resolution order: `messaging_service_sid` (pooled
/// numbers), else `from_number`. Having neither is a configuration error
/// raised at send time, before any network call.
#[derive(Debug, Clone)]
pub struct CarrierConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub messaging_service_sid: Option<String>,
    pub from_number: Option<String>,
}

impl CarrierConfig {
    /// Load from environment. `TWILIO_ACCOUNT_SID` and `TWILIO_AUTH_TOKEN`
    /// are required; identity secrets are optional (validated at send time).
    pub fn from_env() -> Result<Self, ConfigError> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID")
            .map_err(|_| ConfigError::MissingEnvVar("TWILIO_ACCOUNT_SID".into()))?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TWILIO_AUTH_TOKEN".into()))?;

        Ok(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            messaging_service_sid: non_empty_env("TWILIO_MESSAGING_SERVICE_SID"),
            from_number: non_empty_env("TWILIO_PHONE_NUMBER"),
        })
    }
}

/// Service-level configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP bind port.
    pub port: u16,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// Bearer token required by the ad-hoc send and admin endpoints.
    /// None leaves the API unauthenticated (local development only).
    pub api_token: Option<String>,
    /// Scheduler tick interval.
    pub tick_interval: Duration,
    /// How far back the due window reaches from "now".
    pub due_window: Duration,
    /// Fixed reply body for greeting triggers.
    pub auto_reply_body: String,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("SMS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let db_path = std::env::var("SMS_DB_PATH")
            .unwrap_or_else(|_| "./data/wellness-sms.db".to_string());

        let tick_interval_secs: u64 = std::env::var("SMS_TICK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let due_window_secs: u64 = std::env::var("SMS_DUE_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(120);

        let auto_reply_body = std::env::var("SMS_AUTO_REPLY_BODY").unwrap_or_else(|_| {
            "Hi, it's Emma from your care team! I'm here whenever you need me. \
             How are you feeling today?"
                .to_string()
        });

        Self {
            port,
            db_path,
            api_token: non_empty_env("SMS_API_TOKEN"),
            tick_interval: Duration::from_secs(tick_interval_secs),
            due_window: Duration::from_secs(due_window_secs),
            auto_reply_body,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: "./data/wellness-sms.db".to_string(),
            api_token: None,
            tick_interval: Duration::from_secs(60),
            due_window: Duration::from_secs(120),
            auto_reply_body: "Hi, it's Emma from your care team! I'm here whenever you need me. \
                              How are you feeling today?"
                .to_string(),
        }
    }
}

/// Read an env var, treating empty/whitespace values as unset.
fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
