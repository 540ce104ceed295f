//! Campaign tick engine.
//!
//! Each tick re-reads the auto-send gate, selects campaigns whose
//! `next_run_at` falls inside the due window, sends to each resolved
//! recipient at most once per campaign per day, and advances each
//! processed campaign by one day. One misbehaving recipient or campaign
//! never blocks the rest of the pass.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::dispatch::{Dispatcher, OutboundSms};
use crate::error::Error;
use crate::scheduler::campaign::{Campaign, CampaignSend};
use crate::store::Database;

/// Why a tick ended without attempting any sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AutoSendDisabled,
    NoActiveCampaigns,
    NoCampaignsDue,
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl TickReport {
    fn skipped_because(reason: SkipReason) -> Self {
        Self {
            sent: 0,
            skipped: 0,
            errors: 0,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Default)]
struct CampaignTally {
    sent: usize,
    skipped: usize,
    errors: usize,
}

/// Ticking scheduler over the campaign table.
#[derive(Clone)]
pub struct CampaignEngine {
    store: Arc<dyn Database>,
    dispatcher: Dispatcher,
    due_window: StdDuration,
}

impl CampaignEngine {
    pub fn new(store: Arc<dyn Database>, dispatcher: Dispatcher, due_window: StdDuration) -> Self {
        Self {
            store,
            dispatcher,
            due_window,
        }
    }

    /// Run one scheduler pass.
    ///
    /// Returns `Err` only when the store is unreachable before any work
    /// begins; once campaigns are being processed, individual failures are
    /// counted in the report instead.
    pub async fn tick(&self) -> Result<TickReport, Error> {
        if !self.store.auto_send_enabled().await? {
            return Ok(TickReport::skipped_because(SkipReason::AutoSendDisabled));
        }

        if self.store.count_active_campaigns().await? == 0 {
            return Ok(TickReport::skipped_because(SkipReason::NoActiveCampaigns));
        }

        let now = Utc::now();
        let window_start = now
            - Duration::from_std(self.due_window).unwrap_or_else(|_| Duration::minutes(2));
        let due = self.store.list_due_campaigns(window_start, now).await?;
        if due.is_empty() {
            return Ok(TickReport::skipped_because(SkipReason::NoCampaignsDue));
        }

        let mut report = TickReport {
            sent: 0,
            skipped: 0,
            errors: 0,
            reason: None,
        };

        for campaign in due {
            match self.process_campaign(&campaign).await {
                Ok(tally) => {
                    report.sent += tally.sent;
                    report.skipped += tally.skipped;
                    report.errors += tally.errors;
                }
                Err(e) => {
                    error!(campaign_id = %campaign.id, error = %e, "Campaign pass failed");
                    report.errors += 1;
                }
            }

            // Advance regardless of outcome so a bad pass today cannot
            // wedge the campaign into re-running every tick.
            let next = campaign.next_run_at + Duration::days(1);
            if let Err(e) = self.store.set_campaign_next_run(&campaign.id, next).await {
                error!(campaign_id = %campaign.id, error = %e, "Failed to advance campaign schedule");
            }
        }

        info!(
            sent = report.sent,
            skipped = report.skipped,
            errors = report.errors,
            "Scheduler tick complete"
        );
        Ok(report)
    }

    async fn process_campaign(&self, campaign: &Campaign) -> Result<CampaignTally, Error> {
        let mut tally = CampaignTally::default();
        let today = Utc::now().date_naive();

        let recipients = self.store.resolve_recipients(&campaign.target_user_ids).await?;
        if recipients.is_empty() {
            info!(campaign_id = %campaign.id, "Campaign has no reachable recipients");
            return Ok(tally);
        }

        for recipient in recipients {
            match self
                .store
                .campaign_send_exists(&campaign.id, &recipient.user_id, today)
                .await
            {
                Ok(true) => {
                    tally.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        campaign_id = %campaign.id,
                        user_id = %recipient.user_id,
                        error = %e,
                        "Daily-send check failed"
                    );
                    tally.errors += 1;
                    continue;
                }
            }

            match self.send_to_recipient(campaign, &recipient.user_id, &recipient.phone_number, today).await {
                Ok(true) => tally.sent += 1,
                Ok(false) => tally.skipped += 1,
                Err(e) => {
                    warn!(
                        campaign_id = %campaign.id,
                        user_id = %recipient.user_id,
                        error = %e,
                        "Campaign send failed"
                    );
                    tally.errors += 1;
                }
            }
        }

        Ok(tally)
    }

    /// Send one campaign message. Returns Ok(false) when the daily
    /// barrier absorbed the send record (another tick got there first).
    async fn send_to_recipient(
        &self,
        campaign: &Campaign,
        user_id: &str,
        phone_number: &str,
        today: chrono::NaiveDate,
    ) -> Result<bool, Error> {
        let outcome = self
            .dispatcher
            .send_sms(
                OutboundSms::new(phone_number, &campaign.message_body)
                    .with_user(user_id)
                    .with_template(&campaign.template_name)
                    .with_metadata(serde_json::json!({
                        "campaign_id": campaign.id,
                        "source": "scheduler",
                    })),
            )
            .await?;

        if let Err(e) = outcome.result {
            return Err(Error::Carrier(e));
        }

        let recorded = self
            .store
            .insert_campaign_send(&CampaignSend::sent(
                &campaign.id,
                user_id,
                today,
                phone_number,
                &outcome.message_id,
            ))
            .await?;

        if !recorded {
            warn!(
                campaign_id = %campaign.id,
                user_id = %user_id,
                "Daily send recorded by a concurrent tick"
            );
        }
        Ok(recorded)
    }
}

/// Spawn the background tick loop.
///
/// The first interval tick fires immediately; it is consumed so the loop
/// waits one full period before its first real pass.
pub fn spawn_tick_loop(engine: CampaignEngine, interval: StdDuration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = engine.tick().await {
                error!(error = %e, "Scheduler tick failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::mock::MockCarrier;
    use crate::scheduler::campaign::NewCampaign;
    use crate::store::{AUTO_SEND_SETTING, LibSqlBackend, MessageStatus};
    use chrono::{DateTime, Utc};

    const WINDOW: StdDuration = StdDuration::from_secs(120);

    struct Harness {
        store: Arc<LibSqlBackend>,
        carrier: Arc<MockCarrier>,
        engine: CampaignEngine,
    }

    async fn harness(carrier: MockCarrier) -> Harness {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let carrier = Arc::new(carrier);
        let dispatcher = Dispatcher::new(store.clone(), carrier.clone());
        let engine = CampaignEngine::new(store.clone(), dispatcher, WINDOW);
        Harness {
            store,
            carrier,
            engine,
        }
    }

    fn due_campaign(template: &str, targets: &[&str], next_run_at: DateTime<Utc>) -> NewCampaign {
        NewCampaign {
            name: format!("{template} campaign"),
            template_name: template.to_string(),
            message_body: "Don't forget your evening stretch!".to_string(),
            schedule_time: "19:00".to_string(),
            timezone: "UTC".to_string(),
            target_user_ids: targets.iter().map(|s| s.to_string()).collect(),
            next_run_at,
        }
    }

    #[tokio::test]
    async fn disabled_gate_short_circuits() {
        let h = harness(MockCarrier::new()).await;
        h.store.set_setting(AUTO_SEND_SETTING, "false").await.unwrap();
        h.store.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        h.store
            .create_campaign(&due_campaign("evening", &["u1"], Utc::now()))
            .await
            .unwrap();

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.reason, Some(SkipReason::AutoSendDisabled));
        assert_eq!(report.sent, 0);
        assert_eq!(h.carrier.sent_count(), 0);

        // Flipping the gate back takes effect on the very next tick
        h.store.set_setting(AUTO_SEND_SETTING, "true").await.unwrap();
        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn no_campaigns_at_all() {
        let h = harness(MockCarrier::new()).await;
        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.reason, Some(SkipReason::NoActiveCampaigns));
    }

    #[tokio::test]
    async fn none_due_inside_window() {
        let h = harness(MockCarrier::new()).await;
        h.store
            .create_campaign(&due_campaign("later", &["u1"], Utc::now() + Duration::hours(3)))
            .await
            .unwrap();

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.reason, Some(SkipReason::NoCampaignsDue));
    }

    #[tokio::test]
    async fn missed_campaigns_older_than_the_window_are_not_resent() {
        let h = harness(MockCarrier::new()).await;
        h.store.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        h.store
            .create_campaign(&due_campaign("stale", &["u1"], Utc::now() - Duration::minutes(30)))
            .await
            .unwrap();

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.reason, Some(SkipReason::NoCampaignsDue));
        assert_eq!(h.carrier.sent_count(), 0);
    }

    #[tokio::test]
    async fn one_bad_recipient_does_not_block_the_rest() {
        let carrier = MockCarrier::new();
        carrier.fail_for("+15552222222");
        let h = harness(carrier).await;

        h.store.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        h.store.set_phone_number("u2", Some("+15552222222")).await.unwrap();
        h.store.set_phone_number("u3", Some("+15553333333")).await.unwrap();
        h.store
            .create_campaign(&due_campaign("morning", &["u1", "u2", "u3"], Utc::now()))
            .await
            .unwrap();

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(h.carrier.sent_count(), 2);

        // The failed attempt is still on the ledger
        let failed: Vec<_> = h
            .store
            .list_recent_messages(10)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.status == MessageStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].to, "+15552222222");
    }

    #[tokio::test]
    async fn second_tick_same_day_skips_everyone() {
        let h = harness(MockCarrier::new()).await;
        h.store.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        h.store.set_phone_number("u2", Some("+15552222222")).await.unwrap();
        let campaign = h
            .store
            .create_campaign(&due_campaign("morning", &["u1", "u2"], Utc::now()))
            .await
            .unwrap();

        let first = h.engine.tick().await.unwrap();
        assert_eq!(first.sent, 2);

        // Rewind the schedule so the same campaign is due again today
        h.store
            .set_campaign_next_run(&campaign.id, Utc::now())
            .await
            .unwrap();

        let second = h.engine.tick().await.unwrap();
        assert_eq!(second.sent, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(h.carrier.sent_count(), 2);
    }

    #[tokio::test]
    async fn schedule_advances_by_one_day_preserving_time() {
        let h = harness(MockCarrier::new()).await;
        h.store.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        let due_at = Utc::now() - Duration::seconds(45);
        let campaign = h
            .store
            .create_campaign(&due_campaign("morning", &["u1"], due_at))
            .await
            .unwrap();

        h.engine.tick().await.unwrap();

        let reloaded = h.store.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(reloaded.next_run_at, due_at + Duration::days(1));
    }

    #[tokio::test]
    async fn empty_target_list_still_advances() {
        let h = harness(MockCarrier::new()).await;
        let due_at = Utc::now();
        let campaign = h
            .store
            .create_campaign(&due_campaign("orphan", &[], due_at))
            .await
            .unwrap();

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.errors, 0);

        let reloaded = h.store.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(reloaded.next_run_at, due_at + Duration::days(1));
    }

    #[tokio::test]
    async fn carrier_failure_still_advances_the_schedule() {
        let carrier = MockCarrier::new();
        carrier.fail_for("+15551111111");
        let h = harness(carrier).await;
        h.store.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        let due_at = Utc::now();
        let campaign = h
            .store
            .create_campaign(&due_campaign("morning", &["u1"], due_at))
            .await
            .unwrap();

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.errors, 1);

        let reloaded = h.store.get_campaign(&campaign.id).await.unwrap().unwrap();
        assert_eq!(reloaded.next_run_at, due_at + Duration::days(1));
    }

    #[tokio::test]
    async fn campaign_messages_carry_template_and_metadata() {
        let h = harness(MockCarrier::new()).await;
        h.store.set_phone_number("u1", Some("+15551111111")).await.unwrap();
        let campaign = h
            .store
            .create_campaign(&due_campaign("morning", &["u1"], Utc::now()))
            .await
            .unwrap();

        h.engine.tick().await.unwrap();

        let sends = h.store.list_campaign_sends(&campaign.id).await.unwrap();
        assert_eq!(sends.len(), 1);
        let msg = h.store.get_message(&sends[0].message_id).await.unwrap().unwrap();
        assert_eq!(msg.template_name.as_deref(), Some("morning"));
        assert_eq!(msg.metadata["campaign_id"], campaign.id);
        assert_eq!(msg.metadata["source"], "scheduler");
    }

    #[test]
    fn skip_reasons_serialize_snake_case() {
        let report = TickReport::skipped_because(SkipReason::AutoSendDisabled);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["reason"], "auto_send_disabled");

        assert_eq!(
            serde_json::to_value(SkipReason::NoActiveCampaigns).unwrap(),
            "no_active_campaigns"
        );
        assert_eq!(
            serde_json::to_value(SkipReason::NoCampaignsDue).unwrap(),
            "no_campaigns_due"
        );
    }
}
