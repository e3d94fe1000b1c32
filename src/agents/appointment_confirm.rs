//! Unconfirmed appointments for the next day.
//!
//! Lists tomorrow's appointments that the patient has not confirmed and sends
//! the front desk a single call list. The list is delivered at most once per
//! UTC day.

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{already_today, record_event, LastRun};
use crate::agent::{AgentContext, AgentUnit, RunReport, StatusSnapshot};
use crate::error::AgentError;
use crate::events::Event;
use crate::notify::Outbound;

pub const NAME: &str = "appointment-confirm";
pub const SCHEDULE: Option<&str> = Some("0 17 * * 1-5");

const CAN_NOTIFY: &str = "can_notify";
const NOTIFIED: &str = "notified";
const FRONT_DESK: &str = "front-desk";

const UNCONFIRMED_QUERY: &str = "SELECT appointment_id, patient_name, provider, starts_at \
     FROM appointments \
     WHERE confirmed = 0 AND date(starts_at) = ?1 \
     ORDER BY starts_at ASC";

#[derive(Debug, Clone, Deserialize, Serialize)]
struct Appointment {
    appointment_id: Value,
    patient_name: String,
    provider: Option<String>,
    starts_at: String,
}

impl Appointment {
    fn line(&self) -> String {
        match &self.provider {
            Some(provider) => {
                format!("  - {} {} with {}", self.starts_at, self.patient_name, provider)
            }
            None => format!("  - {} {}", self.starts_at, self.patient_name),
        }
    }
}

pub struct AppointmentConfirmAgent {
    ctx: AgentContext,
    last: LastRun,
}

impl AppointmentConfirmAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            last: LastRun::default(),
        }
    }
}

#[async_trait]
impl AgentUnit for AppointmentConfirmAgent {
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

        let day = (now + Duration::days(1)).format("%Y-%m-%d").to_string();
        let unconfirmed: Vec<Appointment> = db.query_as(UNCONFIRMED_QUERY, &[json!(day)]).await?;
        log.info(format!("{} unconfirmed appointment(s) on {}", unconfirmed.len(), day));

        let mut delivery = None;
        if !unconfirmed.is_empty() {
            if already_today(self.ctx.events.as_ref(), &log, NOTIFIED, now).await {
                log.debug("Call list already delivered today");
            } else {
                let body = format!(
                    "Please call these patients to confirm their appointments on {}:\n{}",
                    day,
                    unconfirmed.iter().map(Appointment::line).collect::<Vec<_>>().join("\n")
                );
                let outbound = Outbound::notification(
                    FRONT_DESK,
                    format!("{} unconfirmed appointment(s) tomorrow", unconfirmed.len()),
                    body,
                );
                let result = self.ctx.dispatcher.dispatch(&log, CAN_NOTIFY, &outbound).await;
                if result.sent {
                    let event = Event::new(NAME, NOTIFIED, FRONT_DESK, now)
                        .with_data(json!({ "date": day, "count": unconfirmed.len() }));
                    record_event(self.ctx.events.as_ref(), &log, event).await;
                }
                delivery = Some(result);
            }
        }

        let details = json!({
            "date": day,
            "unconfirmed": unconfirmed.len(),
            "appointments": unconfirmed,
            "notification": delivery,
        });
        let state = if unconfirmed.is_empty() { "all_confirmed" } else { "pending" };
        self.last.set(NAME, state, now, details.clone());

        Ok(RunReport::new(
            NAME,
            format!("{} unconfirmed appointment(s) on {}", unconfirmed.len(), day),
            now,
        )
        .counts(unconfirmed.len(), 0)
        .details(details))
    }

    fn status(&self) -> Option<StatusSnapshot> {
        self.last.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::harness;
    use crate::db::testing::ScriptedBackend;

    #[tokio::test]
    async fn test_notifies_front_desk_once() {
        let backend = ScriptedBackend::new().on(
            "FROM appointments",
            vec![
                json!({
                    "appointment_id": 11,
                    "patient_name": "J. Chen",
                    "provider": "Dr. Okafor",
                    "starts_at": "2026-03-03T09:30:00Z",
                }),
                json!({
                    "appointment_id": 12,
                    "patient_name": "M. Diaz",
                    "provider": null,
                    "starts_at": "2026-03-03T11:00:00Z",
                }),
            ],
        );
        let h = harness(
            &[
                ("SIMULATION_MODE", "false"),
                ("AGENT_APPOINTMENT_CONFIRM_CAN_NOTIFY", "true"),
            ],
            backend,
        );
        let agent = AppointmentConfirmAgent::new(h.ctx.clone());

        let report = agent.run().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.details["date"], json!("2026-03-03"));

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, FRONT_DESK);
        assert!(sent[0].body.contains("J. Chen with Dr. Okafor"));
        assert!(sent[0].body.contains("M. Diaz"));

        agent.run().await.unwrap();
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(agent.status().unwrap().state, "pending");
    }

    #[tokio::test]
    async fn test_nothing_pending() {
        let h = harness(
            &[
                ("SIMULATION_MODE", "false"),
                ("AGENT_APPOINTMENT_CONFIRM_CAN_NOTIFY", "true"),
            ],
            ScriptedBackend::new(),
        );
        let agent = AppointmentConfirmAgent::new(h.ctx.clone());
        let report = agent.run().await.unwrap();
        assert_eq!(report.processed, 0);
        assert!(report.details["notification"].is_null());
        assert_eq!(h.notifier.count(), 0);
        assert_eq!(agent.status().unwrap().state, "all_confirmed");
    }
}
