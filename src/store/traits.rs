//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::DatabaseError;
use crate::scheduler::campaign::{Campaign, CampaignSend, NewCampaign};

/// Settings key for the global auto-send gate, read fresh every tick.
pub const AUTO_SEND_SETTING: &str = "sms_auto_send";

/// Delivery channel for a ledger row.
///
/// Only SMS is dispatched today; the other values exist so the ledger can
/// record rows written by future channels without a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Sms,
    Email,
    Push,
    Browser,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Browser => "browser",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "email" => Channel::Email,
            "push" => Channel::Push,
            "browser" => Channel::Browser,
            _ => Channel::Sms,
        }
    }
}

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inbound" => Direction::Inbound,
            _ => Direction::Outbound,
        }
    }
}

/// Status of a ledger row.
///
/// Outbound rows start `Pending` and transition exactly once to `Sent` or
/// `Failed` (`Delivered` is reserved for carrier status callbacks). Inbound
/// rows are created directly as `Received` and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Received,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Received => "received",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "failed" => MessageStatus::Failed,
            "received" => MessageStatus::Received,
            _ => MessageStatus::Pending,
        }
    }
}

/// A persisted ledger row — one send/receive attempt and its outcome.
#[derive(Debug, Clone)]
pub struct LedgerMessage {
    pub id: String,
    pub channel: Channel,
    pub direction: Direction,
    pub to: String,
    pub from: String,
    pub body: String,
    pub status: MessageStatus,
    pub error: Option<String>,
    /// Carrier-assigned id; unique when present.
    pub external_id: Option<String>,
    /// Opaque bag: campaign linkage, auto-reply flag, source.
    pub metadata: serde_json::Value,
    pub user_id: Option<String>,
    pub template_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new pending outbound row.
#[derive(Debug, Clone)]
pub struct NewOutboundMessage {
    pub channel: Channel,
    pub to: String,
    pub from: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub user_id: Option<String>,
    pub template_name: Option<String>,
}

/// Fields for a new inbound row (created directly as `Received`).
#[derive(Debug, Clone)]
pub struct NewInboundMessage {
    pub external_id: String,
    pub to: String,
    pub from: String,
    pub body: String,
    pub metadata: serde_json::Value,
}

/// A resolved SMS recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: String,
    pub phone_number: String,
}

/// Backend-agnostic database trait covering the ledger, campaigns,
/// campaign sends, recipient preferences, and settings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Message ledger ──────────────────────────────────────────────

    /// Insert a pending outbound row. Returns the generated UUID string.
    async fn create_pending_outbound(
        &self,
        new: &NewOutboundMessage,
    ) -> Result<String, DatabaseError>;

    /// Transition a pending row to `sent`, attaching the carrier id.
    /// Returns false if the row was not pending (already terminal).
    async fn mark_message_sent(&self, id: &str, external_id: &str)
    -> Result<bool, DatabaseError>;

    /// Transition a pending row to `failed`, attaching the error.
    /// Returns false if the row was not pending (already terminal).
    async fn mark_message_failed(&self, id: &str, error: &str) -> Result<bool, DatabaseError>;

    /// Atomically insert an inbound row keyed on the unique external_id.
    /// Returns `None` when a row with that id already exists ("already
    /// processed"). Relies on the storage-level UNIQUE constraint, not a
    /// check-then-insert.
    async fn record_inbound_if_new(
        &self,
        new: &NewInboundMessage,
    ) -> Result<Option<String>, DatabaseError>;

    /// Get a ledger row by id.
    async fn get_message(&self, id: &str) -> Result<Option<LedgerMessage>, DatabaseError>;

    /// Look up a ledger row by its carrier-assigned id.
    async fn get_message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LedgerMessage>, DatabaseError>;

    /// Most recent ledger rows, newest first.
    async fn list_recent_messages(&self, limit: usize)
    -> Result<Vec<LedgerMessage>, DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    /// Create a campaign (active by default).
    async fn create_campaign(&self, new: &NewCampaign) -> Result<Campaign, DatabaseError>;

    /// Get a campaign by id.
    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError>;

    /// Count campaigns with is_active set.
    async fn count_active_campaigns(&self) -> Result<i64, DatabaseError>;

    /// All active campaigns, soonest next run first.
    async fn list_active_campaigns(&self) -> Result<Vec<Campaign>, DatabaseError>;

    /// Active campaigns with `window_start < next_run_at <= now`.
    async fn list_due_campaigns(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Campaign>, DatabaseError>;

    /// Enable or disable a campaign. Returns false if no such campaign.
    async fn set_campaign_active(&self, id: &str, active: bool) -> Result<bool, DatabaseError>;

    /// Set a campaign's next run time (the engine advances it by exactly
    /// one day from its prior value).
    async fn set_campaign_next_run(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Campaign sends (the daily idempotency barrier) ──────────────

    /// Whether a send is already recorded for (campaign, user, day).
    async fn campaign_send_exists(
        &self,
        campaign_id: &str,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError>;

    /// Insert a campaign send. Returns false when the (campaign, user, day)
    /// row already exists — the barrier absorbed a concurrent duplicate.
    async fn insert_campaign_send(&self, send: &CampaignSend) -> Result<bool, DatabaseError>;

    /// All sends recorded for a campaign, newest first.
    async fn list_campaign_sends(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignSend>, DatabaseError>;

    // ── Recipient preferences ───────────────────────────────────────

    /// Resolve user ids to (user, phone) pairs. Users without a stored
    /// phone number are silently excluded.
    async fn resolve_recipients(&self, user_ids: &[String])
    -> Result<Vec<Recipient>, DatabaseError>;

    /// Set (or clear) a user's SMS phone number.
    async fn set_phone_number(
        &self,
        user_id: &str,
        phone: Option<&str>,
    ) -> Result<(), DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    /// Get a settings value.
    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    /// Upsert a settings value.
    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError>;

    /// The global auto-send gate. Missing/garbled values read as false.
    async fn auto_send_enabled(&self) -> Result<bool, DatabaseError> {
        Ok(self
            .get_setting(AUTO_SEND_SETTING)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }
}
