//! Staff credentials nearing expiry.
//!
//! Collects licences and certifications that expire within `window_days`
//! (already-expired ones included) and sends the practice admin one
//! consolidated email.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{AgentContext, AgentUnit, RunReport};
use crate::error::AgentError;
use crate::notify::Outbound;

pub const NAME: &str = "credential-expiry";
pub const SCHEDULE: Option<&str> = Some("0 6 * * 1");

const CAN_EMAIL: &str = "can_email";
const WINDOW_DAYS: &str = "window_days";
const DEFAULT_WINDOW_DAYS: u64 = 30;
const MAX_WINDOW_DAYS: u64 = 3650;
const ADMIN: &str = "practice-admin";

const EXPIRING_QUERY: &str = "SELECT staff_name, credential, expires_on \
     FROM staff_credentials \
     WHERE expires_on <= ?1 \
     ORDER BY expires_on ASC";

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ExpiringCredential {
    staff_name: String,
    credential: String,
    expires_on: NaiveDate,
}

pub struct CredentialExpiryAgent {
    ctx: AgentContext,
}

impl CredentialExpiryAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    fn window_days(&self) -> u64 {
        self.ctx
            .config
            .capability(NAME, WINDOW_DAYS)
            .and_then(|c| c.as_limit())
            .unwrap_or(DEFAULT_WINDOW_DAYS)
            .min(MAX_WINDOW_DAYS)
    }
}

#[async_trait]
impl AgentUnit for CredentialExpiryAgent {
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
        let today = now.date_naive();

        let window = self.window_days();
        let cutoff = today + Duration::days(window as i64);
        let expiring: Vec<ExpiringCredential> = db
            .query_as(EXPIRING_QUERY, &[json!(cutoff.format("%Y-%m-%d").to_string())])
            .await?;
        let expired = expiring.iter().filter(|c| c.expires_on < today).count();

        log.info(format!(
            "{} credential(s) expire within {} days ({} already expired)",
            expiring.len(),
            window,
            expired
        ));

        let delivery = if expiring.is_empty() {
            None
        } else {
            let lines = expiring
                .iter()
                .map(|c| {
                    let days = (c.expires_on - today).num_days();
                    let when = if days < 0 {
                        format!("expired {} day(s) ago", -days)
                    } else {
                        format!("expires in {} day(s)", days)
                    };
                    format!("  - {} ({}): {} on {}", c.staff_name, c.credential, when, c.expires_on)
                })
                .collect::<Vec<_>>()
                .join("\n");
            let outbound = Outbound::email(
                ADMIN,
                format!("{} staff credential(s) need renewal", expiring.len()),
                format!("Credentials expiring within {} days:\n{}", window, lines),
            );
            Some(self.ctx.dispatcher.dispatch(&log, CAN_EMAIL, &outbound).await)
        };

        Ok(RunReport::new(
            NAME,
            format!("{} credential(s) within {} days", expiring.len(), window),
            now,
        )
        .counts(expiring.len(), 0)
        .details(json!({
            "window_days": window,
            "expired": expired,
            "credentials": expiring,
            "email": delivery,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::harness;
    use crate::db::testing::ScriptedBackend;

    fn credentials() -> ScriptedBackend {
        ScriptedBackend::new().on(
            "FROM staff_credentials",
            vec![
                json!({
                    "staff_name": "R. Patel",
                    "credential": "RN licence",
                    "expires_on": "2026-02-20",
                }),
                json!({"staff_name": "L. Moreau", "credential": "BLS", "expires_on": "2026-03-12"}),
            ],
        )
    }

    #[tokio::test]
    async fn test_one_consolidated_email() {
        let h = harness(
            &[
                ("SIMULATION_MODE", "false"),
                ("AGENT_CREDENTIAL_EXPIRY_CAN_EMAIL", "true"),
            ],
            credentials(),
        );
        let report = CredentialExpiryAgent::new(h.ctx.clone()).run().await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.details["expired"], json!(1));
        assert_eq!(report.details["window_days"], json!(DEFAULT_WINDOW_DAYS));

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("R. Patel (RN licence): expired 10 day(s) ago"));
        assert!(sent[0].body.contains("L. Moreau (BLS): expires in 10 day(s)"));
    }

    #[tokio::test]
    async fn test_window_from_capability() {
        let h = harness(&[("AGENT_CREDENTIAL_EXPIRY_WINDOW_DAYS", "90")], ScriptedBackend::new());
        let report = CredentialExpiryAgent::new(h.ctx.clone()).run().await.unwrap();
        assert_eq!(report.details["window_days"], json!(90));
        assert!(report.details["email"].is_null());
    }
}
