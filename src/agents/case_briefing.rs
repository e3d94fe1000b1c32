//! Open escalations and per-case briefings.
//!
//! Runs on demand only. `run` summarises the open escalation queue without
//! any outbound action. The `briefing` operation writes a short briefing for
//! one case: through the language model when one is configured, otherwise (or
//! when the model call fails) from a fixed template.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::{AgentContext, AgentUnit, RunReport};
use crate::error::AgentError;

pub const NAME: &str = "case-briefing";
pub const SCHEDULE: Option<&str> = None;

pub const BRIEFING: &str = "briefing";
const OPERATIONS: &[&str] = &[BRIEFING];

const OPEN_QUERY: &str = "SELECT case_id, patient_name, reason, priority, opened_at \
     FROM escalations \
     WHERE status = 'open' \
     ORDER BY opened_at ASC";

const CASE_QUERY: &str = "SELECT case_id, patient_name, reason, priority, opened_at, notes \
     FROM escalations \
     WHERE case_id = ?1";

const SYSTEM_PROMPT: &str = "You write short briefings for clinic staff about escalated \
     patient cases. Use plain language, at most five sentences, and do not invent facts \
     that are not in the case record.";

#[derive(Debug, Clone, Deserialize, Serialize)]
struct Escalation {
    case_id: Value,
    patient_name: String,
    reason: String,
    priority: Option<String>,
    opened_at: String,
    #[serde(default)]
    notes: Option<String>,
}

impl Escalation {
    fn priority(&self) -> &str {
        self.priority.as_deref().unwrap_or("normal")
    }
}

fn template_briefing(case: &Escalation) -> String {
    let mut text = format!(
        "Case {} ({} priority): {} was escalated on {} for {}.",
        case.case_id,
        case.priority(),
        case.patient_name,
        case.opened_at,
        case.reason
    );
    if let Some(notes) = case.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        text.push_str(" Latest notes: ");
        text.push_str(notes.trim());
    }
    text
}

pub struct CaseBriefingAgent {
    ctx: AgentContext,
}

impl CaseBriefingAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    async fn briefing(&self, case_id: &str) -> Result<RunReport, AgentError> {
        let log = self.ctx.log_for(NAME);
        let db = self.ctx.require_db()?;

        let case = db
            .query_as::<Escalation>(CASE_QUERY, &[json!(case_id)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::NotFound(format!("case {}", case_id)))?;

        let (text, source) = match &self.ctx.llm {
            Some(llm) => {
                let record = serde_json::to_string_pretty(&case).unwrap_or_default();
                let prompt = format!("Write a briefing for this escalated case:\n{}", record);
                match llm.complete(SYSTEM_PROMPT, &prompt).await {
                    Ok(text) => (text, "model"),
                    Err(e) => {
                        log.warn(format!("Model unavailable, using template: {}", e));
                        (template_briefing(&case), "template")
                    }
                }
            }
            None => (template_briefing(&case), "template"),
        };

        log.info(format!("Prepared briefing for case {} ({})", case_id, source));
        Ok(RunReport::new(NAME, format!("briefing for case {}", case_id), self.ctx.now())
            .counts(1, 0)
            .details(json!({
                "case_id": case.case_id,
                "source": source,
                "briefing": text,
            })))
    }
}

#[async_trait]
impl AgentUnit for CaseBriefingAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn schedule(&self) -> Option<&str> {
        SCHEDULE
    }

    async fn run(&self) -> Result<RunReport, AgentError> {
        let log = self.ctx.log_for(NAME);
        let db = self.ctx.require_db()?;

        let open: Vec<Escalation> = db.query_as(OPEN_QUERY, &[]).await?;
        let urgent = open.iter().filter(|c| c.priority() == "urgent").count();
        log.info(format!("{} open escalation(s), {} urgent", open.len(), urgent));

        let cases: Vec<Value> = open
            .iter()
            .map(|c| {
                json!({
                    "case_id": c.case_id,
                    "patient_name": c.patient_name,
                    "reason": c.reason,
                    "priority": c.priority(),
                    "opened_at": c.opened_at,
                })
            })
            .collect();

        Ok(RunReport::new(
            NAME,
            format!("{} open escalation(s), {} urgent", open.len(), urgent),
            self.ctx.now(),
        )
        .counts(open.len(), 0)
        .details(json!({ "open": open.len(), "urgent": urgent, "cases": cases })))
    }

    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    async fn invoke(&self, operation: &str, id: &str) -> Result<RunReport, AgentError> {
        match operation {
            BRIEFING => self.briefing(id).await,
            _ => Err(AgentError::UnknownOperation {
                agent: NAME.to_string(),
                operation: operation.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::testing::harness;
    use crate::db::testing::ScriptedBackend;
    use crate::error::ExternalServiceError;
    use crate::llm::LanguageModel;

    struct CannedModel(Result<String, ExternalServiceError>);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(
            &self,
            _system: &str,
            prompt: &str,
        ) -> Result<String, ExternalServiceError> {
            assert!(prompt.contains("Chest pain follow-up"));
            self.0.clone()
        }
    }

    fn escalations() -> ScriptedBackend {
        ScriptedBackend::new()
            .on(
                "WHERE status = 'open'",
                vec![
                    json!({
                        "case_id": 42,
                        "patient_name": "A. Rivera",
                        "reason": "Chest pain follow-up",
                        "priority": "urgent",
                        "opened_at": "2026-03-01",
                    }),
                    json!({
                        "case_id": 43,
                        "patient_name": "K. Lee",
                        "reason": "Billing dispute",
                        "priority": null,
                        "opened_at": "2026-03-02",
                    }),
                ],
            )
            .on(
                "WHERE case_id",
                vec![json!({
                    "case_id": 42,
                    "patient_name": "A. Rivera",
                    "reason": "Chest pain follow-up",
                    "priority": "urgent",
                    "opened_at": "2026-03-01",
                    "notes": "Cardiology referral pending.",
                })],
            )
    }

    #[tokio::test]
    async fn test_run_lists_open_cases_without_side_effects() {
        let h = harness(&[("SIMULATION_MODE", "false")], escalations());
        let agent = CaseBriefingAgent::new(h.ctx.clone());
        assert_eq!(agent.schedule(), None);

        let report = agent.run().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.details["urgent"], json!(1));
        assert_eq!(report.details["cases"][1]["priority"], json!("normal"));
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_briefing_uses_model() {
        let h = harness(&[], escalations());
        let ctx = h.ctx.clone().with_llm(Arc::new(CannedModel(Ok("Urgent cardiac case.".into()))));
        let report = CaseBriefingAgent::new(ctx).invoke(BRIEFING, "42").await.unwrap();
        assert_eq!(report.details["source"], json!("model"));
        assert_eq!(report.details["briefing"], json!("Urgent cardiac case."));
    }

    #[tokio::test]
    async fn test_briefing_falls_back_to_template() {
        let h = harness(&[], escalations());
        let failing = CannedModel(Err(ExternalServiceError::new("openrouter", "timeout")));
        let ctx = h.ctx.clone().with_llm(Arc::new(failing));
        let report = CaseBriefingAgent::new(ctx).invoke(BRIEFING, "42").await.unwrap();
        assert_eq!(report.details["source"], json!("template"));
        let text = report.details["briefing"].as_str().unwrap();
        assert!(text.starts_with("Case 42 (urgent priority): A. Rivera"));
        assert!(text.ends_with("Cardiology referral pending."));

        let report = CaseBriefingAgent::new(h.ctx.clone()).invoke(BRIEFING, "42").await.unwrap();
        assert_eq!(report.details["source"], json!("template"));
    }

    #[tokio::test]
    async fn test_unknown_case_and_operation() {
        let h = harness(&[], ScriptedBackend::new());
        let agent = CaseBriefingAgent::new(h.ctx.clone());
        assert!(matches!(
            agent.invoke(BRIEFING, "999").await,
            Err(AgentError::NotFound(_))
        ));
        assert!(matches!(
            agent.invoke("summarise", "1").await,
            Err(AgentError::UnknownOperation { .. })
        ));
        assert_eq!(agent.operations(), &[BRIEFING]);
    }
}
