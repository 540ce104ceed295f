//! Twilio Messages API client.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::carrier::{CarrierReceipt, SenderIdentity, SmsCarrier};
use crate::config::CarrierConfig;
use crate::error::CarrierError;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Twilio REST carrier.
///
/// Sends via the Messages endpoint with HTTP basic auth. No retry logic
/// here; callers own failure handling through the message ledger.
pub struct TwilioCarrier {
    config: CarrierConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

impl TwilioCarrier {
    pub fn new(config: CarrierConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{TWILIO_API_BASE}/Accounts/{}/Messages.json",
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsCarrier for TwilioCarrier {
    fn sender_identity(&self) -> Result<SenderIdentity, CarrierError> {
        if let Some(sid) = &self.config.messaging_service_sid {
            return Ok(SenderIdentity::MessagingService(sid.clone()));
        }
        if let Some(number) = &self.config.from_number {
            return Ok(SenderIdentity::PhoneNumber(number.clone()));
        }
        Err(CarrierError::NoSenderIdentity)
    }

    async fn send(&self, to: &str, body: &str) -> Result<CarrierReceipt, CarrierError> {
        // Resolve identity before building the request so a configuration
        // gap surfaces as a clean error instead of a provider rejection.
        let identity = self.sender_identity()?;

        let mut form: Vec<(&str, &str)> = vec![("To", to), ("Body", body)];
        match &identity {
            SenderIdentity::MessagingService(sid) => form.push(("MessagingServiceSid", sid)),
            SenderIdentity::PhoneNumber(number) => form.push(("From", number)),
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| CarrierError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CarrierError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TwilioMessageResponse = response
            .json()
            .await
            .map_err(|e| CarrierError::InvalidResponse(e.to_string()))?;

        debug!(to = %to, sid = %parsed.sid, "Twilio accepted message");
        Ok(CarrierReceipt { sid: parsed.sid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(service_sid: Option<&str>, from: Option<&str>) -> CarrierConfig {
        CarrierConfig {
            account_sid: "AC_test".to_string(),
            auth_token: SecretString::from("token"),
            messaging_service_sid: service_sid.map(String::from),
            from_number: from.map(String::from),
        }
    }

    #[test]
    fn messaging_service_takes_precedence() {
        let carrier = TwilioCarrier::new(config(Some("MG1"), Some("+15551234567")));
        assert_eq!(
            carrier.sender_identity().unwrap(),
            SenderIdentity::MessagingService("MG1".to_string())
        );
    }

    #[test]
    fn falls_back_to_phone_number() {
        let carrier = TwilioCarrier::new(config(None, Some("+15551234567")));
        assert_eq!(
            carrier.sender_identity().unwrap(),
            SenderIdentity::PhoneNumber("+15551234567".to_string())
        );
    }

    #[test]
    fn no_identity_configured_is_an_error() {
        let carrier = TwilioCarrier::new(config(None, None));
        assert!(matches!(
            carrier.sender_identity(),
            Err(CarrierError::NoSenderIdentity)
        ));
    }

    #[tokio::test]
    async fn send_without_identity_fails_before_any_request() {
        let carrier = TwilioCarrier::new(config(None, None));
        let result = carrier.send("+15551234567", "hello").await;
        assert!(matches!(result, Err(CarrierError::NoSenderIdentity)));
    }

    #[test]
    fn identity_label() {
        assert_eq!(SenderIdentity::MessagingService("MG1".into()).label(), "MG1");
        assert_eq!(SenderIdentity::PhoneNumber("+1555".into()).label(), "+1555");
    }
}
