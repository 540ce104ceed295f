//! Campaign domain types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named recurring daily SMS broadcast.
///
/// `next_run_at` is self-managed: after each processing pass the engine
/// advances it by exactly one day from its previous value, preserving
/// time-of-day, independent of per-recipient outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    /// Unique template identifier for this campaign.
    pub template_name: String,
    pub message_body: String,
    /// Local send time as "HH:MM".
    pub schedule_time: String,
    /// IANA timezone name the schedule_time was entered in.
    pub timezone: String,
    pub target_user_ids: Vec<String>,
    pub is_active: bool,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub template_name: String,
    pub message_body: String,
    pub schedule_time: String,
    pub timezone: String,
    #[serde(default)]
    pub target_user_ids: Vec<String>,
    pub next_run_at: DateTime<Utc>,
}

impl NewCampaign {
    /// Materialize into a full campaign, active by default.
    pub fn into_campaign(self) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            template_name: self.template_name,
            message_body: self.message_body,
            schedule_time: self.schedule_time,
            timezone: self.timezone,
            target_user_ids: self.target_user_ids,
            is_active: true,
            next_run_at: self.next_run_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One recorded campaign delivery — the daily idempotency barrier.
///
/// At most one row exists per (campaign_id, user_id, sent_on); the store
/// enforces this with a UNIQUE constraint so overlapping ticks cannot both
/// record a send.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignSend {
    pub campaign_id: String,
    pub user_id: String,
    /// Calendar day (UTC) the send was attributed to.
    pub sent_on: NaiveDate,
    pub phone_number: String,
    /// Ledger row id of the outbound message.
    pub message_id: String,
    pub status: String,
    pub sent_at: DateTime<Utc>,
}

impl CampaignSend {
    pub fn sent(
        campaign_id: &str,
        user_id: &str,
        sent_on: NaiveDate,
        phone_number: &str,
        message_id: &str,
    ) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            user_id: user_id.to_string(),
            sent_on,
            phone_number: phone_number.to_string(),
            message_id: message_id.to_string(),
            status: "sent".to_string(),
            sent_at: Utc::now(),
        }
    }
}
