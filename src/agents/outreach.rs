//! Recall outreach.
//!
//! Emails patients who are overdue for a follow-up visit. The number of
//! messages per UTC day is capped by the `daily_limit` capability; sends are
//! recorded in the event store so the cap holds across runs. Candidates left
//! over once the cap is reached are reported as skipped and picked up on a
//! later day. Counting and sending happen under one lock per agent, so a
//! manual run that overlaps a scheduled one cannot exceed the cap.

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{record_event, start_of_day};
use crate::agent::{AgentContext, AgentUnit, RunReport};
use crate::error::AgentError;
use crate::events::{Event, EventFilter};
use crate::notify::Outbound;

pub const NAME: &str = "outreach";
pub const SCHEDULE: Option<&str> = Some("0 10 * * 1-5");

const CAN_SEND: &str = "can_send";
const DAILY_LIMIT: &str = "daily_limit";
const SENT: &str = "sent";

/// Patients whose last visit is older than this are due for recall.
const RECALL_AFTER_DAYS: i64 = 180;

const RECALL_QUERY: &str = "SELECT patient_id, name, email, last_visit \
     FROM recall_candidates \
     WHERE last_visit <= ?1 \
     ORDER BY last_visit ASC";

#[derive(Debug, Clone, Deserialize)]
struct RecallCandidate {
    patient_id: Value,
    name: String,
    email: Option<String>,
    last_visit: Option<String>,
}

pub struct OutreachAgent {
    ctx: AgentContext,
    sending: Mutex<()>,
}

impl OutreachAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            sending: Mutex::new(()),
        }
    }

    async fn sent_today(&self) -> Result<u64, AgentError> {
        let filter = EventFilter::default()
            .agent(NAME)
            .kind(SENT)
            .since(start_of_day(self.ctx.now()));
        let sent = self
            .ctx
            .events
            .query(&filter)
            .await
            .map_err(|e| AgentError::Failed(format!("could not read send history: {}", e)))?;
        Ok(sent.len() as u64)
    }
}

fn recall_message(candidate: &RecallCandidate) -> Outbound {
    let since = candidate
        .last_visit
        .as_deref()
        .map(|d| format!(" Your last visit with us was on {}.", d))
        .unwrap_or_default();
    Outbound::email(
        candidate.email.clone().unwrap_or_default(),
        "Time to schedule your follow-up visit",
        format!(
            "Hello {},\n\nOur records show you are due for a follow-up appointment.{}\n\
             Please call the clinic or reply to this message to book a time.\n",
            candidate.name, since
        ),
    )
}

#[async_trait]
impl AgentUnit for OutreachAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn schedule(&self) -> Option<&str> {
        SCHEDULE
    }

    async fn run(&self) -> Result<RunReport, AgentError> {
        let log = self.ctx.log_for(NAME);
        let db = self.ctx.require_db()?;
        let now = self.ctx.now();

        let cutoff = (now - Duration::days(RECALL_AFTER_DAYS))
            .format("%Y-%m-%d")
            .to_string();
        let candidates: Vec<RecallCandidate> = db.query_as(RECALL_QUERY, &[json!(cutoff)]).await?;

        let cap_guard = self.sending.lock().await;
        let limit = self.ctx.config.capability_limit(NAME, DAILY_LIMIT);
        let already = self.sent_today().await?;
        let mut remaining = limit.saturating_sub(already);
        log.info(format!(
            "{} recall candidate(s); {} of {} daily sends left",
            candidates.len(),
            remaining,
            limit
        ));

        let mut attempted = 0usize;
        let mut sent = 0usize;
        let mut missing_email = Vec::new();
        let mut skipped = Vec::new();

        for candidate in &candidates {
            if remaining == 0 {
                skipped.push(candidate.patient_id.clone());
                continue;
            }
            if candidate.email.as_deref().map_or(true, |e| e.trim().is_empty()) {
                log.warn(format!("Patient {} has no email address", candidate.patient_id));
                missing_email.push(candidate.patient_id.clone());
                continue;
            }

            let message = recall_message(candidate);
            let result = self.ctx.dispatcher.dispatch(&log, CAN_SEND, &message).await;
            attempted += 1;
            remaining -= 1;

            if result.sent {
                sent += 1;
                let event = Event::new(NAME, SENT, &message.destination, now)
                    .with_data(json!({ "patient_id": candidate.patient_id }));
                record_event(self.ctx.events.as_ref(), &log, event).await;
            }
        }

        drop(cap_guard);

        if !skipped.is_empty() {
            log.info(format!("Daily limit reached; {} candidate(s) deferred", skipped.len()));
        }

        Ok(RunReport::new(
            NAME,
            format!("{} recall message(s) attempted, {} sent", attempted, sent),
            self.ctx.now(),
        )
        .counts(attempted, skipped.len())
        .details(json!({
            "daily_limit": limit,
            "sent": sent,
            "missing_email": missing_email,
            "deferred": skipped,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{harness, monday_morning};
    use crate::db::testing::ScriptedBackend;

    fn candidates(n: usize) -> ScriptedBackend {
        let rows = (1..=n)
            .map(|i| {
                json!({
                    "patient_id": i,
                    "name": format!("Patient {}", i),
                    "email": format!("p{}@example.org", i),
                    "last_visit": "2025-06-01",
                })
            })
            .collect();
        ScriptedBackend::new().on("FROM recall_candidates", rows)
    }

    const LIVE: &[(&str, &str)] = &[
        ("SIMULATION_MODE", "false"),
        ("AGENT_OUTREACH_ENABLED", "true"),
        ("AGENT_OUTREACH_CAN_SEND", "true"),
        ("AGENT_OUTREACH_DAILY_LIMIT", "2"),
    ];

    #[tokio::test]
    async fn test_daily_limit_caps_sends() {
        let h = harness(LIVE, candidates(3));
        let agent = OutreachAgent::new(h.ctx.clone());

        let report = agent.run().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(h.notifier.count(), 2);
        assert_eq!(report.details["deferred"], json!([3]));
    }

    #[tokio::test]
    async fn test_limit_holds_across_runs_and_resets_next_day() {
        let h = harness(LIVE, candidates(3));
        let agent = OutreachAgent::new(h.ctx.clone());

        agent.run().await.unwrap();
        let again = agent.run().await.unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 3);
        assert_eq!(h.notifier.count(), 2);

        h.clock.set(monday_morning() + Duration::days(1));
        let tomorrow = agent.run().await.unwrap();
        assert_eq!(tomorrow.processed, 2);
        assert_eq!(h.notifier.count(), 4);
    }

    #[tokio::test]
    async fn test_overlapping_runs_share_the_cap() {
        let h = harness(LIVE, candidates(3));
        let agent = OutreachAgent::new(h.ctx.clone());

        let (a, b) = futures::join!(agent.run(), agent.run());
        let processed = a.unwrap().processed + b.unwrap().processed;
        assert_eq!(processed, 2);
        assert_eq!(h.notifier.count(), 2);
    }

    #[tokio::test]
    async fn test_simulated_sends_are_not_counted() {
        let h = harness(
            &[
                ("AGENT_OUTREACH_CAN_SEND", "true"),
                ("AGENT_OUTREACH_DAILY_LIMIT", "2"),
            ],
            candidates(3),
        );
        let agent = OutreachAgent::new(h.ctx.clone());

        let first = agent.run().await.unwrap();
        assert_eq!(first.processed, 2);
        assert_eq!(first.details["sent"], json!(0));
        let second = agent.run().await.unwrap();
        assert_eq!(second.processed, 2);
        assert_eq!(h.notifier.count(), 0);

        let recorded = h.ctx.events.query(&EventFilter::default()).await.unwrap();
        assert!(recorded.is_empty());
    }

    #[tokio::test]
    async fn test_missing_email_does_not_use_a_slot() {
        let backend = ScriptedBackend::new().on(
            "FROM recall_candidates",
            vec![
                json!({"patient_id": 1, "name": "No Email", "email": null}),
                json!({"patient_id": 2, "name": "B", "email": "b@example.org"}),
                json!({"patient_id": 3, "name": "C", "email": "c@example.org"}),
            ],
        );
        let h = harness(LIVE, backend);
        let report = OutreachAgent::new(h.ctx.clone()).run().await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.details["missing_email"], json!([1]));
        let to: Vec<String> = h.notifier.sent().into_iter().map(|o| o.destination).collect();
        assert_eq!(to, vec!["b@example.org", "c@example.org"]);
    }

    #[tokio::test]
    async fn test_blocked_capability_sends_nothing() {
        let h = harness(
            &[("SIMULATION_MODE", "false"), ("AGENT_OUTREACH_DAILY_LIMIT", "2")],
            candidates(1),
        );
        let report = OutreachAgent::new(h.ctx.clone()).run().await.unwrap();
        assert_eq!(report.details["sent"], json!(0));
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_data_failure_fails_the_run() {
        let h = harness(LIVE, ScriptedBackend::new().fail_on("FROM recall_candidates", "timeout"));
        let err = OutreachAgent::new(h.ctx.clone()).run().await.unwrap_err();
        assert!(matches!(err, AgentError::Data(_)));
        assert_eq!(h.notifier.count(), 0);
    }
}
