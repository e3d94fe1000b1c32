//! Concrete agents.
//!
//! Each agent is a thin implementation of [`crate::agent::AgentUnit`]: read
//! through the guarded data access, aggregate, and hand any outbound action
//! to the dispatcher.

pub mod appointment_confirm;
pub mod case_briefing;
pub mod claims_watch;
pub mod credential_expiry;
pub mod daily_digest;
pub mod health_monitor;
pub mod outreach;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::agent::StatusSnapshot;
use crate::events::{Event, EventFilter, EventStore};
use crate::logging::AgentLogger;

/// Midnight UTC of the day containing `t`.
pub(crate) fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or(t)
}

/// Last-known state an agent reports from `status()`.
#[derive(Debug, Default)]
pub(crate) struct LastRun(Mutex<Option<StatusSnapshot>>);

impl LastRun {
    pub fn set(&self, agent: &str, state: impl Into<String>, at: DateTime<Utc>, details: Value) {
        let snapshot = StatusSnapshot {
            agent: agent.to_string(),
            state: state.into(),
            last_run: Some(at),
            details,
        };
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }

    pub fn get(&self) -> Option<StatusSnapshot> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Whether the agent behind `log` recorded a `kind` event today. Store failures
/// count as "no", so an unreadable history never suppresses an alert.
pub(crate) async fn already_today(
    events: &dyn EventStore,
    log: &AgentLogger,
    kind: &str,
    now: DateTime<Utc>,
) -> bool {
    let filter = EventFilter::default()
        .agent(log.tag())
        .kind(kind)
        .since(start_of_day(now));
    match events.query(&filter).await {
        Ok(found) => !found.is_empty(),
        Err(e) => {
            log.warn(format!("Could not read event history: {}", e));
            false
        }
    }
}

/// Append an event, logging instead of failing.
pub(crate) async fn record_event(events: &dyn EventStore, log: &AgentLogger, event: Event) {
    if let Err(e) = events.record(event).await {
        log.warn(format!("Could not record event: {}", e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_start_of_day() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 17, 45, 12).unwrap();
        assert_eq!(start_of_day(t), Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }
}
