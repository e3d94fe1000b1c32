//! Denied-claims volume.
//!
//! Counts claims denied in the trailing 24 hours, grouped by payer, and
//! alerts billing when the total exceeds the `denial_threshold` capability.
//! At most one alert is delivered per UTC day.

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{already_today, record_event, LastRun};
use crate::agent::{AgentContext, AgentUnit, RunReport, StatusSnapshot};
use crate::error::AgentError;
use crate::events::Event;
use crate::notify::Outbound;

pub const NAME: &str = "claims-watch";
pub const SCHEDULE: Option<&str> = Some("0 8 * * *");

const CAN_ALERT: &str = "can_alert";
const DENIAL_THRESHOLD: &str = "denial_threshold";
const ALERTED: &str = "alerted";
const ALERT_DESTINATION: &str = "billing-team";
const TOP_PAYERS: usize = 3;

const DENIALS_QUERY: &str = "SELECT COALESCE(payer, 'unknown') AS payer, COUNT(*) AS denied \
     FROM claims \
     WHERE status = 'denied' AND denied_at >= ?1 \
     GROUP BY payer \
     ORDER BY denied DESC";

#[derive(Debug, Clone, Deserialize, Serialize)]
struct PayerDenials {
    payer: String,
    denied: u64,
}

pub struct ClaimsWatchAgent {
    ctx: AgentContext,
    last: LastRun,
}

impl ClaimsWatchAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            last: LastRun::default(),
        }
    }
}

#[async_trait]
impl AgentUnit for ClaimsWatchAgent {
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

        let since = (now - Duration::hours(24)).to_rfc3339();
        let by_payer: Vec<PayerDenials> = db.query_as(DENIALS_QUERY, &[json!(since)]).await?;
        let denied: u64 = by_payer.iter().map(|p| p.denied).sum();
        let threshold = self.ctx.config.capability_limit(NAME, DENIAL_THRESHOLD);
        let top: Vec<&PayerDenials> = by_payer.iter().take(TOP_PAYERS).collect();
        let above = denied > threshold;

        log.info(format!(
            "{} denied claim(s) in the last 24h (threshold {})",
            denied, threshold
        ));

        let mut delivery = None;
        if above {
            if already_today(self.ctx.events.as_ref(), &log, ALERTED, now).await {
                log.debug("Denial alert already delivered today");
            } else {
                let payers = top
                    .iter()
                    .map(|p| format!("  - {}: {}", p.payer, p.denied))
                    .collect::<Vec<_>>()
                    .join("\n");
                let outbound = Outbound::alert(
                    ALERT_DESTINATION,
                    format!("{} claims denied in the last 24 hours", denied),
                    format!(
                        "Denied claims ({}) exceeded the threshold of {}.\nTop payers:\n{}",
                        denied, threshold, payers
                    ),
                );
                let result = self.ctx.dispatcher.dispatch(&log, CAN_ALERT, &outbound).await;
                if result.sent {
                    let event = Event::new(NAME, ALERTED, ALERT_DESTINATION, now)
                        .with_data(json!({ "denied": denied }));
                    record_event(self.ctx.events.as_ref(), &log, event).await;
                }
                delivery = Some(result);
            }
        }

        let details = json!({
            "denied": denied,
            "threshold": threshold,
            "top_payers": top,
            "alert": delivery,
        });
        let state = if above { "above_threshold" } else { "normal" };
        self.last.set(NAME, state, now, details.clone());

        Ok(RunReport::new(
            NAME,
            format!("{} denied claim(s) in the last 24h, threshold {}", denied, threshold),
            now,
        )
        .counts(by_payer.len(), 0)
        .details(details))
    }

    fn status(&self) -> Option<StatusSnapshot> {
        self.last.get()
    }
}
