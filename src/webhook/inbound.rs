//! Inbound SMS processing.
//!
//! Every delivery is pushed through a single `INSERT OR IGNORE` against the
//! unique provider message id; only the delivery that actually created the
//! row is allowed to trigger an auto-reply, so carrier webhook retries
//! never double-reply.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::dispatch::{Dispatcher, OutboundSms};
use crate::error::Error;
use crate::store::{Database, NewInboundMessage};
use crate::webhook::triggers;

/// A parsed inbound SMS delivery, from either the Twilio form payload or a
/// JSON body.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundSms {
    #[serde(alias = "MessageSid", alias = "SmsSid")]
    pub message_sid: String,
    #[serde(alias = "From")]
    pub from: String,
    #[serde(alias = "To")]
    pub to: String,
    #[serde(alias = "Body", default)]
    pub body: String,
}

/// What one delivery did.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// First delivery; row created, auto-reply attempted if triggered.
    Recorded { message_id: String, replied: bool },
    /// Repeat delivery of an already-recorded message.
    Duplicate,
}

/// Dedup gate plus auto-reply.
#[derive(Clone)]
pub struct InboundProcessor {
    store: Arc<dyn Database>,
    dispatcher: Dispatcher,
    auto_reply_body: String,
}

impl InboundProcessor {
    pub fn new(store: Arc<dyn Database>, dispatcher: Dispatcher, auto_reply_body: String) -> Self {
        Self {
            store,
            dispatcher,
            auto_reply_body,
        }
    }

    /// Record one delivery and, when it is new and matches a greeting
    /// trigger, send the auto-reply.
    ///
    /// Auto-reply failures are recorded on the reply's own ledger row and
    /// logged; they never fail the webhook, so the carrier does not retry
    /// a delivery we already ingested.
    pub async fn process(&self, inbound: &InboundSms) -> Result<InboundOutcome, Error> {
        let created = self
            .store
            .record_inbound_if_new(&NewInboundMessage {
                external_id: inbound.message_sid.clone(),
                to: inbound.to.clone(),
                from: inbound.from.clone(),
                body: inbound.body.clone(),
                metadata: serde_json::json!({"source": "webhook"}),
            })
            .await?;

        let Some(message_id) = created else {
            info!(external_id = %inbound.message_sid, "Duplicate webhook delivery ignored");
            return Ok(InboundOutcome::Duplicate);
        };

        info!(message_id = %message_id, from = %inbound.from, "Inbound SMS recorded");

        let mut replied = false;
        if triggers::matches_trigger(&inbound.body) {
            match self
                .dispatcher
                .send_sms(
                    OutboundSms::new(&inbound.from, &self.auto_reply_body).with_metadata(
                        serde_json::json!({
                            "auto_reply": true,
                            "in_reply_to": message_id,
                            "source": "webhook",
                        }),
                    ),
                )
                .await
            {
                Ok(outcome) if outcome.is_sent() => replied = true,
                Ok(outcome) => {
                    warn!(
                        message_id = %outcome.message_id,
                        "Auto-reply send failed; inbound message kept"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Auto-reply could not be dispatched");
                }
            }
        }

        Ok(InboundOutcome::Recorded {
            message_id,
            replied,
        })
    }
}
