//! SMS carrier abstraction.
//!
//! `SmsCarrier` is the seam between the dispatch pipeline and the provider
//! HTTP API: one identity resolution, one send call. Everything above it
//! (ledger rows, idempotency, retries) is provider-agnostic.

pub mod twilio;

use async_trait::async_trait;

use crate::error::CarrierError;

pub use twilio::TwilioCarrier;

/// How outbound messages identify their sender.
///
/// A messaging service pool takes precedence over a single long code when
/// both are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderIdentity {
    MessagingService(String),
    PhoneNumber(String),
}

impl SenderIdentity {
    /// Human-readable label for the ledger `from` column.
    pub fn label(&self) -> &str {
        match self {
            SenderIdentity::MessagingService(sid) => sid,
            SenderIdentity::PhoneNumber(number) => number,
        }
    }
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone)]
pub struct CarrierReceipt {
    /// Provider-assigned message identifier (Twilio SID).
    pub sid: String,
}

#[async_trait]
pub trait SmsCarrier: Send + Sync {
    /// Resolve the configured sender identity without touching the network.
    fn sender_identity(&self) -> Result<SenderIdentity, CarrierError>;

    /// Submit one SMS to the provider.
    async fn send(&self, to: &str, body: &str) -> Result<CarrierReceipt, CarrierError>;
}
