//! libSQL backend — async `Database` trait implementation.
//!
//! Local file and in-memory databases share one connection; the idempotency
//! barriers (unique external_id, unique campaign/user/day) live in the
//! schema so concurrent writers race at the storage level, not in
//! application code.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::scheduler::campaign::{Campaign, CampaignSend, NewCampaign};
use crate::store::migrations;
use crate::store::traits::{
    Channel, Database, Direction, LedgerMessage, MessageStatus, NewInboundMessage,
    NewOutboundMessage, Recipient,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or(NaiveDate::MIN)
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const MESSAGE_COLUMNS: &str = "id, channel, direction, to_number, from_number, body, status, error, external_id, metadata, user_id, template_name, created_at, updated_at";

const CAMPAIGN_COLUMNS: &str = "id, name, template_name, message_body, schedule_time, timezone, target_user_ids, is_active, next_run_at, created_at, updated_at";

const CAMPAIGN_SEND_COLUMNS: &str =
    "campaign_id, user_id, sent_on, phone_number, message_id, status, sent_at";

/// Map a libsql Row to a LedgerMessage. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<LedgerMessage, libsql::Error> {
    let channel_str: String = row.get(1)?;
    let direction_str: String = row.get(2)?;
    let status_str: String = row.get(6)?;
    let metadata_str: String = row.get(9)?;
    let created_str: String = row.get(12)?;
    let updated_str: String = row.get(13)?;

    Ok(LedgerMessage {
        id: row.get(0)?,
        channel: Channel::parse(&channel_str),
        direction: Direction::parse(&direction_str),
        to: row.get(3)?,
        from: row.get(4)?,
        body: row.get(5)?,
        status: MessageStatus::parse(&status_str),
        error: row.get(7).ok(),
        external_id: row.get(8).ok(),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_else(|_| serde_json::json!({})),
        user_id: row.get(10).ok(),
        template_name: row.get(11).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a Campaign. Column order matches CAMPAIGN_COLUMNS.
fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, libsql::Error> {
    let targets_str: String = row.get(6)?;
    let is_active: i64 = row.get(7)?;
    let next_run_str: String = row.get(8)?;
    let created_str: String = row.get(9)?;
    let updated_str: String = row.get(10)?;

    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        template_name: row.get(2)?,
        message_body: row.get(3)?,
        schedule_time: row.get(4)?,
        timezone: row.get(5)?,
        target_user_ids: serde_json::from_str(&targets_str).unwrap_or_default(),
        is_active: is_active != 0,
        next_run_at: parse_datetime(&next_run_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a CampaignSend. Column order matches CAMPAIGN_SEND_COLUMNS.
fn row_to_campaign_send(row: &libsql::Row) -> Result<CampaignSend, libsql::Error> {
    let sent_on_str: String = row.get(2)?;
    let sent_at_str: String = row.get(6)?;

    Ok(CampaignSend {
        campaign_id: row.get(0)?,
        user_id: row.get(1)?,
        sent_on: parse_date(&sent_on_str),
        phone_number: row.get(3)?,
        message_id: row.get(4)?,
        status: row.get(5)?,
        sent_at: parse_datetime(&sent_at_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Message ledger ──────────────────────────────────────────────

    async fn create_pending_outbound(
        &self,
        new: &NewOutboundMessage,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&new.metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO messages (id, channel, direction, to_number, from_number, body,
                    status, metadata, user_id, template_name, created_at, updated_at)
                 VALUES (?1, ?2, 'outbound', ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?9)",
                params![
                    id.clone(),
                    new.channel.as_str(),
                    new.to.clone(),
                    new.from.clone(),
                    new.body.clone(),
                    metadata,
                    opt_text(new.user_id.as_deref()),
                    opt_text(new.template_name.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_pending_outbound: {e}")))?;

        debug!(message_id = %id, to = %new.to, "Pending outbound row created");
        Ok(id)
    }

    async fn mark_message_sent(
        &self,
        id: &str,
        external_id: &str,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'sent', external_id = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, external_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_message_sent: {e}")))?;

        Ok(affected > 0)
    }

    async fn mark_message_failed(&self, id: &str, error: &str) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'failed', error = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, error, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_message_failed: {e}")))?;

        Ok(affected > 0)
    }

    async fn record_inbound_if_new(
        &self,
        new: &NewInboundMessage,
    ) -> Result<Option<String>, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&new.metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        // Single statement; the UNIQUE(external_id) constraint absorbs
        // concurrent duplicate deliveries without a check-then-insert race.
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO messages (id, channel, direction, to_number, from_number,
                    body, status, external_id, metadata, created_at, updated_at)
                 VALUES (?1, 'sms', 'inbound', ?2, ?3, ?4, 'received', ?5, ?6, ?7, ?7)",
                params![
                    id.clone(),
                    new.to.clone(),
                    new.from.clone(),
                    new.body.clone(),
                    new.external_id.clone(),
                    metadata,
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_inbound_if_new: {e}")))?;

        if affected == 0 {
            debug!(external_id = %new.external_id, "Duplicate inbound delivery ignored");
            return Ok(None);
        }
        debug!(message_id = %id, external_id = %new.external_id, "Inbound message recorded");
        Ok(Some(id))
    }

    async fn get_message(&self, id: &str) -> Result<Option<LedgerMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let msg = row_to_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_message row parse: {e}")))?;
                Ok(Some(msg))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn get_message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LedgerMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE external_id = ?1"),
                params![external_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message_by_external_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let msg = row_to_message(&row).map_err(|e| {
                    DatabaseError::Query(format!("get_message_by_external_id row parse: {e}"))
                })?;
                Ok(Some(msg))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "get_message_by_external_id: {e}"
            ))),
        }
    }

    async fn list_recent_messages(
        &self,
        limit: usize,
    ) -> Result<Vec<LedgerMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     ORDER BY created_at DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_recent_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn create_campaign(&self, new: &NewCampaign) -> Result<Campaign, DatabaseError> {
        let campaign = new.clone().into_campaign();
        let targets = serde_json::to_string(&campaign.target_user_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO campaigns (id, name, template_name, message_body, schedule_time,
                    timezone, target_user_ids, is_active, next_run_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?9)",
                params![
                    campaign.id.clone(),
                    campaign.name.clone(),
                    campaign.template_name.clone(),
                    campaign.message_body.clone(),
                    campaign.schedule_time.clone(),
                    campaign.timezone.clone(),
                    targets,
                    campaign.next_run_at.to_rfc3339(),
                    campaign.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_campaign: {e}")))?;

        debug!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
        Ok(campaign)
    }

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_campaign: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let campaign = row_to_campaign(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_campaign row parse: {e}")))?;
                Ok(Some(campaign))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_campaign: {e}"))),
        }
    }

    async fn count_active_campaigns(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM campaigns WHERE is_active = 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_active_campaigns: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).map_err(|e| {
                    DatabaseError::Query(format!("count_active_campaigns parse: {e}"))
                })?;
                Ok(count)
            }
            _ => Ok(0),
        }
    }

    async fn list_active_campaigns(&self) -> Result<Vec<Campaign>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
                     WHERE is_active = 1 ORDER BY next_run_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_campaigns: {e}")))?;

        let mut campaigns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_campaign(&row) {
                Ok(c) => campaigns.push(c),
                Err(e) => tracing::warn!("Skipping campaign row: {e}"),
            }
        }
        Ok(campaigns)
    }

    async fn list_due_campaigns(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Campaign>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
                     WHERE is_active = 1 AND next_run_at > ?1 AND next_run_at <= ?2
                     ORDER BY next_run_at ASC"
                ),
                params![window_start.to_rfc3339(), now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_due_campaigns: {e}")))?;

        let mut campaigns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_campaign(&row) {
                Ok(c) => campaigns.push(c),
                Err(e) => tracing::warn!("Skipping campaign row: {e}"),
            }
        }
        Ok(campaigns)
    }

    async fn set_campaign_active(&self, id: &str, active: bool) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE campaigns SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active as i64, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_campaign_active: {e}")))?;
        Ok(affected > 0)
    }

    async fn set_campaign_next_run(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE campaigns SET next_run_at = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, next_run_at.to_rfc3339(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_campaign_next_run: {e}")))?;

        debug!(campaign_id = %id, next_run_at = %next_run_at, "Campaign schedule advanced");
        Ok(())
    }

    // ── Campaign sends ──────────────────────────────────────────────

    async fn campaign_send_exists(
        &self,
        campaign_id: &str,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM campaign_sends
                 WHERE campaign_id = ?1 AND user_id = ?2 AND sent_on = ?3",
                params![campaign_id, user_id, day.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("campaign_send_exists: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("campaign_send_exists: {e}")))?;
                Ok(count > 0)
            }
            _ => Ok(false),
        }
    }

    async fn insert_campaign_send(&self, send: &CampaignSend) -> Result<bool, DatabaseError> {
        // OR IGNORE: the unique (campaign, user, day) constraint is the
        // idempotency barrier; losing the race is not an error.
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO campaign_sends
                    (campaign_id, user_id, sent_on, phone_number, message_id, status, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    send.campaign_id.clone(),
                    send.user_id.clone(),
                    send.sent_on.to_string(),
                    send.phone_number.clone(),
                    send.message_id.clone(),
                    send.status.clone(),
                    send.sent_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_campaign_send: {e}")))?;

        Ok(affected > 0)
    }

    async fn list_campaign_sends(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignSend>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CAMPAIGN_SEND_COLUMNS} FROM campaign_sends
                     WHERE campaign_id = ?1 ORDER BY sent_at DESC"
                ),
                params![campaign_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaign_sends: {e}")))?;

        let mut sends = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_campaign_send(&row) {
                Ok(s) => sends.push(s),
                Err(e) => tracing::warn!("Skipping campaign send row: {e}"),
            }
        }
        Ok(sends)
    }

    // ── Recipient preferences ───────────────────────────────────────

    async fn resolve_recipients(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<Recipient>, DatabaseError> {
        let mut recipients = Vec::new();
        for user_id in user_ids {
            let mut rows = self
                .conn()
                .query(
                    "SELECT phone_number FROM user_preferences
                     WHERE user_id = ?1 AND phone_number IS NOT NULL AND phone_number != ''",
                    params![user_id.clone()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("resolve_recipients: {e}")))?;

            if let Ok(Some(row)) = rows.next().await {
                let phone_number: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("resolve_recipients: {e}")))?;
                recipients.push(Recipient {
                    user_id: user_id.clone(),
                    phone_number,
                });
            }
        }
        Ok(recipients)
    }

    async fn set_phone_number(
        &self,
        user_id: &str,
        phone: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO user_preferences (user_id, phone_number, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    phone_number = excluded.phone_number,
                    updated_at = excluded.updated_at",
                params![user_id, opt_text(phone), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_phone_number: {e}")))?;
        Ok(())
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_setting: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting: {e}"))),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_setting: {e}")))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::AUTO_SEND_SETTING;
    use chrono::Duration;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn outbound(to: &str) -> NewOutboundMessage {
        NewOutboundMessage {
            channel: Channel::Sms,
            to: to.to_string(),
            from: "+15550001111".to_string(),
            body: "Time for your morning walk!".to_string(),
            metadata: serde_json::json!({"source": "test"}),
            user_id: Some("u1".to_string()),
            template_name: None,
        }
    }

    fn inbound(external_id: &str, body: &str) -> NewInboundMessage {
        NewInboundMessage {
            external_id: external_id.to_string(),
            to: "+15550001111".to_string(),
            from: "+15559998888".to_string(),
            body: body.to_string(),
            metadata: serde_json::json!({"source": "webhook"}),
        }
    }

    fn campaign_due_at(template: &str, next_run_at: DateTime<Utc>) -> NewCampaign {
        NewCampaign {
            name: "Morning check-in".to_string(),
            template_name: template.to_string(),
            message_body: "Good morning! How did you sleep?".to_string(),
            schedule_time: "09:00".to_string(),
            timezone: "America/New_York".to_string(),
            target_user_ids: vec!["u1".to_string()],
            next_run_at,
        }
    }

    #[tokio::test]
    async fn pending_outbound_roundtrip() {
        let db = test_db().await;
        let id = db.create_pending_outbound(&outbound("+15551234567")).await.unwrap();

        let msg = db.get_message(&id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(msg.direction, Direction::Outbound);
        assert_eq!(msg.channel, Channel::Sms);
        assert_eq!(msg.to, "+15551234567");
        assert_eq!(msg.metadata["source"], "test");
        assert!(msg.external_id.is_none());
        assert!(msg.error.is_none());
    }

    #[tokio::test]
    async fn mark_sent_attaches_external_id() {
        let db = test_db().await;
        let id = db.create_pending_outbound(&outbound("+15551234567")).await.unwrap();

        let transitioned = db.mark_message_sent(&id, "SM100").await.unwrap();
        assert!(transitioned);

        let msg = db.get_message(&id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.external_id.as_deref(), Some("SM100"));
    }

    #[tokio::test]
    async fn terminal_rows_are_never_clobbered() {
        let db = test_db().await;
        let id = db.create_pending_outbound(&outbound("+15551234567")).await.unwrap();

        assert!(db.mark_message_sent(&id, "SM100").await.unwrap());

        // A stale concurrent attempt must not overwrite "sent" with "failed"
        let overwrote = db.mark_message_failed(&id, "late failure").await.unwrap();
        assert!(!overwrote);

        let msg = db.get_message(&id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.error.is_none());

        // And sent cannot be re-marked either
        assert!(!db.mark_message_sent(&id, "SM200").await.unwrap());
        let msg = db.get_message(&id).await.unwrap().unwrap();
        assert_eq!(msg.external_id.as_deref(), Some("SM100"));
    }

    #[tokio::test]
    async fn mark_failed_records_error() {
        let db = test_db().await;
        let id = db.create_pending_outbound(&outbound("+15551234567")).await.unwrap();

        assert!(db.mark_message_failed(&id, "carrier rejected: 21211").await.unwrap());

        let msg = db.get_message(&id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.error.as_deref(), Some("carrier rejected: 21211"));
    }

    #[tokio::test]
    async fn inbound_dedup_by_external_id() {
        let db = test_db().await;

        let first = db.record_inbound_if_new(&inbound("SM123", "Hi Emma")).await.unwrap();
        assert!(first.is_some());

        // Repeated carrier delivery of the same webhook is a safe no-op
        let second = db.record_inbound_if_new(&inbound("SM123", "Hi Emma")).await.unwrap();
        assert!(second.is_none());

        let stored = db.get_message_by_external_id("SM123").await.unwrap().unwrap();
        assert_eq!(stored.id, first.unwrap());
        assert_eq!(stored.status, MessageStatus::Received);
        assert_eq!(stored.direction, Direction::Inbound);
    }

    #[tokio::test]
    async fn due_window_selection() {
        let db = test_db().await;
        let now = Utc::now();

        let due = db
            .create_campaign(&campaign_due_at("morning", now - Duration::seconds(30)))
            .await
            .unwrap();
        db.create_campaign(&campaign_due_at("future", now + Duration::minutes(10)))
            .await
            .unwrap();
        db.create_campaign(&campaign_due_at("stale", now - Duration::minutes(5)))
            .await
            .unwrap();
        let inactive = db
            .create_campaign(&campaign_due_at("paused", now - Duration::seconds(30)))
            .await
            .unwrap();
        db.set_campaign_active(&inactive.id, false).await.unwrap();

        let window_start = now - Duration::minutes(2);
        let selected = db.list_due_campaigns(window_start, now).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, due.id);
    }

    #[tokio::test]
    async fn active_listing_excludes_paused_campaigns() {
        let db = test_db().await;
        let now = Utc::now();
        db.create_campaign(&campaign_due_at("morning", now)).await.unwrap();
        let paused = db.create_campaign(&campaign_due_at("evening", now)).await.unwrap();
        db.set_campaign_active(&paused.id, false).await.unwrap();

        let active = db.list_active_campaigns().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].template_name, "morning");
        assert_eq!(db.count_active_campaigns().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_template_name_rejected() {
        let db = test_db().await;
        let now = Utc::now();
        db.create_campaign(&campaign_due_at("morning", now)).await.unwrap();

        let dup = db.create_campaign(&campaign_due_at("morning", now)).await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn campaign_send_barrier() {
        let db = test_db().await;
        let day = Utc::now().date_naive();
        let send = CampaignSend::sent("c1", "u1", day, "+15551234567", "m1");

        assert!(!db.campaign_send_exists("c1", "u1", day).await.unwrap());
        assert!(db.insert_campaign_send(&send).await.unwrap());
        assert!(db.campaign_send_exists("c1", "u1", day).await.unwrap());

        // Second insert for the same (campaign, user, day) is absorbed
        let duplicate = CampaignSend::sent("c1", "u1", day, "+15551234567", "m2");
        assert!(!db.insert_campaign_send(&duplicate).await.unwrap());

        let sends = db.list_campaign_sends("c1").await.unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].message_id, "m1");
    }

    #[tokio::test]
    async fn same_user_different_day_is_not_a_duplicate() {
        let db = test_db().await;
        let today = Utc::now().date_naive();
        let yesterday = today - Duration::days(1);

        assert!(db
            .insert_campaign_send(&CampaignSend::sent("c1", "u1", yesterday, "+1555", "m1"))
            .await
            .unwrap());
        assert!(db
            .insert_campaign_send(&CampaignSend::sent("c1", "u1", today, "+1555", "m2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn resolve_recipients_excludes_users_without_phone() {
        let db = test_db().await;
        db.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        db.set_phone_number("u2", None).await.unwrap();
        // u3 has no preferences row at all

        let ids = vec!["u1".to_string(), "u2".to_string(), "u3".to_string()];
        let recipients = db.resolve_recipients(&ids).await.unwrap();
        assert_eq!(
            recipients,
            vec![Recipient {
                user_id: "u1".to_string(),
                phone_number: "+15551111111".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn auto_send_flag_roundtrip() {
        let db = test_db().await;

        // Seeded on by migration
        assert!(db.auto_send_enabled().await.unwrap());

        db.set_setting(AUTO_SEND_SETTING, "false").await.unwrap();
        assert!(!db.auto_send_enabled().await.unwrap());

        db.set_setting(AUTO_SEND_SETTING, "true").await.unwrap();
        assert!(db.auto_send_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn schedule_advance_persists() {
        let db = test_db().await;
        let next = Utc::now();
        let campaign = db.create_campaign(&campaign_due_at("morning", next)).await.unwrap();

        let advanced = campaign.next_run_at + Duration::days(1);
        db.set_campaign_next_run(&campaign.id, advanced).await.unwrap();

        let reloaded = db.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(reloaded.next_run_at, advanced);
    }

    #[tokio::test]
    async fn list_recent_messages_newest_first() {
        let db = test_db().await;
        db.create_pending_outbound(&outbound("+1555000001")).await.unwrap();
        let inbound_id = db
            .record_inbound_if_new(&inbound("SM9", "checking in"))
            .await
            .unwrap()
            .unwrap();

        let all = db.list_recent_messages(10).await.unwrap();
        assert_eq!(all.len(), 2);

        let limited = db.list_recent_messages(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        let _ = inbound_id;
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("wellness.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(db);
    }
}
