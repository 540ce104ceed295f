//! Outbound dispatch pipeline.
//!
//! Every SMS that leaves the system goes through `Dispatcher::send_sms`:
//! a pending ledger row is created first, then exactly one carrier call is
//! made, then the row is driven to a terminal status. The ledger row
//! therefore exists even when the carrier call never happens (bad config)
//! or fails mid-flight.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::carrier::SmsCarrier;
use crate::error::{CarrierError, DatabaseError};
use crate::store::{Channel, Database, NewOutboundMessage};

/// A single outbound SMS request.
#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub to: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub user_id: Option<String>,
    pub template_name: Option<String>,
}

impl OutboundSms {
    pub fn new(to: &str, body: &str) -> Self {
        Self {
            to: to.to_string(),
            body: body.to_string(),
            metadata: serde_json::json!({}),
            user_id: None,
            template_name: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_template(mut self, template_name: &str) -> Self {
        self.template_name = Some(template_name.to_string());
        self
    }
}

/// Result of one dispatch attempt. The ledger row exists either way.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Ledger row id.
    pub message_id: String,
    /// Provider sid on success, carrier error on failure.
    pub result: Result<String, CarrierError>,
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        self.result.is_ok()
    }
}

/// Shared send pipeline: ledger row, carrier call, terminal transition.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Database>,
    carrier: Arc<dyn SmsCarrier>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Database>, carrier: Arc<dyn SmsCarrier>) -> Self {
        Self { store, carrier }
    }

    /// Send one SMS, recording the attempt in the message ledger.
    ///
    /// Database failures while creating the pending row abort the send
    /// (nothing has left the system yet). Carrier failures, including a
    /// missing sender identity, are recorded on the row and returned in
    /// the outcome rather than as an error.
    pub async fn send_sms(&self, sms: OutboundSms) -> Result<DispatchOutcome, DatabaseError> {
        let from = self
            .carrier
            .sender_identity()
            .map(|identity| identity.label().to_string())
            .unwrap_or_default();

        let message_id = self
            .store
            .create_pending_outbound(&NewOutboundMessage {
                channel: Channel::Sms,
                to: sms.to.clone(),
                from,
                body: sms.body.clone(),
                metadata: sms.metadata,
                user_id: sms.user_id,
                template_name: sms.template_name,
            })
            .await?;

        match self.carrier.send(&sms.to, &sms.body).await {
            Ok(receipt) => {
                let transitioned = self.store.mark_message_sent(&message_id, &receipt.sid).await?;
                if !transitioned {
                    warn!(message_id = %message_id, "Sent message was already terminal; not updated");
                }
                info!(message_id = %message_id, sid = %receipt.sid, to = %sms.to, "SMS sent");
                Ok(DispatchOutcome {
                    message_id,
                    result: Ok(receipt.sid),
                })
            }
            Err(e) => {
                let transitioned = self
                    .store
                    .mark_message_failed(&message_id, &e.to_string())
                    .await?;
                if !transitioned {
                    warn!(message_id = %message_id, "Failed message was already terminal; not updated");
                }
                error!(message_id = %message_id, to = %sms.to, error = %e, "SMS send failed");
                Ok(DispatchOutcome {
                    message_id,
                    result: Err(e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::mock::MockCarrier;
    use crate::store::{LibSqlBackend, MessageStatus};

    async fn setup(carrier: MockCarrier) -> (Arc<LibSqlBackend>, Dispatcher) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(carrier));
        (store, dispatcher)
    }

    #[tokio::test]
    async fn successful_send_marks_ledger_sent() {
        let (store, dispatcher) = setup(MockCarrier::new()).await;

        let outcome = dispatcher
            .send_sms(OutboundSms::new("+15551234567", "hello").with_user("u1"))
            .await
            .unwrap();
        assert!(outcome.is_sent());

        let msg = store.get_message(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.external_id.as_deref(), Some("SMMOCK0001"));
        assert_eq!(msg.user_id.as_deref(), Some("u1"));
        assert_eq!(msg.from, "+15550000000");
    }

    #[tokio::test]
    async fn carrier_rejection_marks_ledger_failed() {
        let carrier = MockCarrier::new();
        carrier.fail_for("+15551234567");
        let (store, dispatcher) = setup(carrier).await;

        let outcome = dispatcher
            .send_sms(OutboundSms::new("+15551234567", "hello"))
            .await
            .unwrap();
        assert!(!outcome.is_sent());

        let msg = store.get_message(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert!(msg.error.as_deref().unwrap().contains("mock rejection"));
        assert!(msg.external_id.is_none());
    }

    #[tokio::test]
    async fn missing_sender_identity_is_recorded_on_the_row() {
        let (store, dispatcher) = setup(MockCarrier::without_identity()).await;

        let outcome = dispatcher
            .send_sms(OutboundSms::new("+15551234567", "hello"))
            .await
            .unwrap();
        assert!(matches!(outcome.result, Err(CarrierError::NoSenderIdentity)));

        // A ledger row exists even though no carrier call was possible
        let msg = store.get_message(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.from, "");
    }

    #[tokio::test]
    async fn metadata_and_template_flow_to_the_ledger() {
        let (store, dispatcher) = setup(MockCarrier::new()).await;

        let outcome = dispatcher
            .send_sms(
                OutboundSms::new("+15551234567", "Good morning!")
                    .with_metadata(serde_json::json!({"campaign_id": "c1"}))
                    .with_template("morning_checkin"),
            )
            .await
            .unwrap();

        let msg = store.get_message(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(msg.metadata["campaign_id"], "c1");
        assert_eq!(msg.template_name.as_deref(), Some("morning_checkin"));
    }
}
