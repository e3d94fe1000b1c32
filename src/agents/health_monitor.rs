//! Data store health with transition-only alerting.
//!
//! Each run pings the data store. An alert goes out when the store first
//! becomes unreachable and again when it recovers; repeated failures or
//! repeated successes are silent. The first successful check after startup
//! is not a recovery.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::agent::{AgentContext, AgentUnit, RunReport, StatusSnapshot};
use crate::error::AgentError;
use crate::notify::Outbound;

pub const NAME: &str = "health-monitor";
pub const SCHEDULE: Option<&str> = Some("*/5 * * * *");

const CAN_ALERT: &str = "can_alert";
const ALERT_DESTINATION: &str = "ops-oncall";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// A change worth telling someone about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    WentDown,
    Recovered,
}

/// Next state after a check. `Unknown` is never re-entered.
fn next_state(current: HealthState, check_ok: bool) -> (HealthState, Option<Transition>) {
    match (current, check_ok) {
        (HealthState::Unhealthy, false) => (HealthState::Unhealthy, None),
        (_, false) => (HealthState::Unhealthy, Some(Transition::WentDown)),
        (HealthState::Unhealthy, true) => (HealthState::Healthy, Some(Transition::Recovered)),
        (_, true) => (HealthState::Healthy, None),
    }
}

#[derive(Debug)]
struct Observed {
    state: HealthState,
    checked_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct HealthMonitorAgent {
    ctx: AgentContext,
    observed: Mutex<Observed>,
}

impl HealthMonitorAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            observed: Mutex::new(Observed {
                state: HealthState::Unknown,
                checked_at: None,
                last_error: None,
            }),
        }
    }

    pub fn state(&self) -> HealthState {
        self.observed.lock().unwrap_or_else(|e| e.into_inner()).state
    }
}

#[async_trait]
impl AgentUnit for HealthMonitorAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn schedule(&self) -> Option<&str> {
        SCHEDULE
    }

    async fn run(&self) -> Result<RunReport, AgentError> {
        let log = self.ctx.log_for(NAME);
        let db = self.ctx.require_db()?;

        let check = db.ping().await;
        let now = self.ctx.now();
        let error = check.as_ref().err().map(|e| e.to_string());

        let (previous, state, transition) = {
            let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
            let previous = observed.state;
            let (state, transition) = next_state(previous, check.is_ok());
            observed.state = state;
            observed.checked_at = Some(now);
            observed.last_error = error.clone();
            (previous, state, transition)
        };

        if previous != state {
            log.info(format!("{} is now {}", db.backend_name(), state.as_str()));
        } else {
            log.debug(format!("{} still {}", db.backend_name(), state.as_str()));
        }

        let alert = match transition {
            Some(Transition::WentDown) => Some(Outbound::alert(
                ALERT_DESTINATION,
                "Data store unreachable",
                format!(
                    "Health check against {} failed at {}: {}",
                    db.backend_name(),
                    now.to_rfc3339(),
                    error.as_deref().unwrap_or("unknown error")
                ),
            )),
            Some(Transition::Recovered) => Some(Outbound::alert(
                ALERT_DESTINATION,
                "Data store recovered",
                format!("{} is reachable again as of {}", db.backend_name(), now.to_rfc3339()),
            )),
            None => None,
        };

        let delivery = match alert {
            Some(outbound) => Some(self.ctx.dispatcher.dispatch(&log, CAN_ALERT, &outbound).await),
            None => None,
        };

        Ok(RunReport::new(NAME, format!("data store {}", state.as_str()), now)
            .counts(1, 0)
            .details(json!({
                "state": state,
                "previous": previous,
                "error": error,
                "alert": delivery,
            })))
    }

    fn status(&self) -> Option<StatusSnapshot> {
        let observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        Some(StatusSnapshot {
            agent: NAME.to_string(),
            state: observed.state.as_str().to_string(),
            last_run: observed.checked_at,
            details: json!({ "last_error": observed.last_error }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::harness;
    use crate::db::testing::ScriptedBackend;

    const LIVE: &[(&str, &str)] = &[
        ("SIMULATION_MODE", "false"),
        ("AGENT_HEALTH_MONITOR_CAN_ALERT", "true"),
    ];

    #[test]
    fn test_transitions() {
        use HealthState::*;
        assert_eq!(next_state(Unknown, true), (Healthy, None));
        assert_eq!(next_state(Unknown, false), (Unhealthy, Some(Transition::WentDown)));
        assert_eq!(next_state(Healthy, false), (Unhealthy, Some(Transition::WentDown)));
        assert_eq!(next_state(Unhealthy, false), (Unhealthy, None));
        assert_eq!(next_state(Unhealthy, true), (Healthy, Some(Transition::Recovered)));
        assert_eq!(next_state(Healthy, true), (Healthy, None));
    }

    #[tokio::test]
    async fn test_alerts_only_on_transitions() {
        let h = harness(LIVE, ScriptedBackend::new().fail_on("SELECT 1", "connection refused"));
        let agent = HealthMonitorAgent::new(h.ctx.clone());

        agent.run().await.unwrap();
        agent.run().await.unwrap();
        assert_eq!(agent.state(), HealthState::Unhealthy);

        h.backend.set("SELECT 1", Ok(Vec::new()));
        agent.run().await.unwrap();
        agent.run().await.unwrap();
        assert_eq!(agent.state(), HealthState::Healthy);

        let subjects: Vec<String> = h.notifier.sent().into_iter().map(|o| o.subject).collect();
        assert_eq!(subjects, vec!["Data store unreachable", "Data store recovered"]);
    }

    #[tokio::test]
    async fn test_first_success_is_silent() {
        let h = harness(LIVE, ScriptedBackend::new());
        let agent = HealthMonitorAgent::new(h.ctx.clone());
        assert_eq!(agent.status().unwrap().state, "unknown");

        let report = agent.run().await.unwrap();
        assert_eq!(report.details["state"], json!("healthy"));
        assert_eq!(h.notifier.count(), 0);

        let status = agent.status().unwrap();
        assert_eq!(status.state, "healthy");
        assert!(status.last_run.is_some());
    }

    #[tokio::test]
    async fn test_simulated_alert_still_tracks_state() {
        let h = harness(&[], ScriptedBackend::new().fail_on("SELECT 1", "down"));
        let agent = HealthMonitorAgent::new(h.ctx.clone());
        let report = agent.run().await.unwrap();
        assert_eq!(report.details["alert"]["sent"], json!(false));
        assert_eq!(agent.state(), HealthState::Unhealthy);
        assert_eq!(h.notifier.count(), 0);
    }
}
