//! Morning digest.
//!
//! Calls other agents directly and stitches their output into one email to
//! the practice admin. Dependencies are handed in at construction; the
//! scheduler passes the instances it already runs so the digest sees the
//! same state (e.g. the health monitor's last check).
//!
//! Sections always appear in the same order: health, claims, appointments,
//! escalations. A dependency that fails or panics is left out and listed as
//! omitted; the rest of the digest still goes out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{AgentContext, AgentRef, AgentUnit, RunReport, StatusSnapshot};
use crate::error::AgentError;
use crate::logging::AgentLogger;
use crate::notify::Outbound;

pub const NAME: &str = "daily-digest";
pub const SCHEDULE: Option<&str> = Some("0 7 * * *");

const CAN_EMAIL: &str = "can_email";
const ADMIN: &str = "practice-admin";

/// Agents the digest reads from.
#[derive(Clone)]
pub struct DigestSources {
    pub claims: AgentRef,
    pub appointments: AgentRef,
    pub escalations: AgentRef,
    /// Only its status snapshot is read; the digest never triggers a check.
    pub health: AgentRef,
}

struct Section {
    title: &'static str,
    body: String,
}

pub struct DailyDigestAgent {
    ctx: AgentContext,
    sources: DigestSources,
}

impl DailyDigestAgent {
    pub fn new(ctx: AgentContext, sources: DigestSources) -> Self {
        Self { ctx, sources }
    }
}

/// Run a dependency in a task of its own so a panic becomes an error.
async fn run_isolated(agent: AgentRef) -> Result<RunReport, AgentError> {
    let name = agent.name().to_string();
    match tokio::spawn(async move { agent.run().await }).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(AgentError::Failed(format!("{} panicked", name))),
        Err(e) => Err(AgentError::Failed(format!("{} aborted: {}", name, e))),
    }
}

fn from_run(
    title: &'static str,
    outcome: Result<RunReport, AgentError>,
    omitted: &mut Vec<&'static str>,
    log: &AgentLogger,
) -> Option<Section> {
    match outcome {
        Ok(report) => Some(Section {
            title,
            body: report.summary,
        }),
        Err(e) => {
            log.warn(format!("Leaving out {} section: {}", title, e));
            omitted.push(title);
            None
        }
    }
}

#[async_trait]
impl AgentUnit for DailyDigestAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn schedule(&self) -> Option<&str> {
        SCHEDULE
    }

    async fn run(&self) -> Result<RunReport, AgentError> {
        let log = self.ctx.log_for(NAME);
        let now = self.ctx.now();

        let (claims, appointments, escalations) = futures::join!(
            run_isolated(Arc::clone(&self.sources.claims)),
            run_isolated(Arc::clone(&self.sources.appointments)),
            run_isolated(Arc::clone(&self.sources.escalations)),
        );

        let health = Section {
            title: "Health",
            body: match self.sources.health.status() {
                Some(StatusSnapshot {
                    state,
                    last_run: Some(at),
                    ..
                }) => format!("Data store {} as of {}", state, at.to_rfc3339()),
                _ => "No health check recorded".to_string(),
            },
        };

        let mut omitted = Vec::new();
        let sections: Vec<Section> = [
            Some(health),
            from_run("Claims", claims, &mut omitted, &log),
            from_run("Appointments", appointments, &mut omitted, &log),
            from_run("Escalations", escalations, &mut omitted, &log),
        ]
        .into_iter()
        .flatten()
        .collect();

        let date = now.format("%Y-%m-%d");
        let mut body = format!("Daily digest for {}\n", date);
        for section in &sections {
            body.push_str(&format!("\n{}\n  {}\n", section.title, section.body));
        }
        if !omitted.is_empty() {
            body.push_str(&format!("\nUnavailable: {}\n", omitted.join(", ")));
        }

        let outbound = Outbound::email(ADMIN, format!("Daily digest {}", date), body);
        let delivery = self.ctx.dispatcher.dispatch(&log, CAN_EMAIL, &outbound).await;

        let titles: Vec<&str> = sections.iter().map(|s| s.title).collect();
        Ok(RunReport::new(
            NAME,
            format!("digest with {} section(s), {} omitted", sections.len(), omitted.len()),
            now,
        )
        .counts(sections.len(), omitted.len())
        .details(json!({
            "sections": titles,
            "omitted": omitted,
            "email": delivery,
        })))
    }
}
