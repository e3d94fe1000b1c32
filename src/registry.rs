//! Static agent registry.
//!
//! Every agent the process knows about is listed here with its schedule; the
//! scheduler and the manual trigger both resolve names through this table
//! instead of discovering agents at runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::agent::{AgentContext, AgentRef};
use crate::agents::{
    appointment_confirm, case_briefing, claims_watch, credential_expiry, daily_digest,
    health_monitor, outreach,
};

/// Name and trigger of a known agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentDefinition {
    pub name: &'static str,
    /// `None` means on-demand only.
    pub schedule: Option<&'static str>,
    pub description: &'static str,
}

/// All known agents. Coordinators come after the agents they depend on.
pub const DEFINITIONS: &[AgentDefinition] = &[
    AgentDefinition {
        name: outreach::NAME,
        schedule: outreach::SCHEDULE,
        description: "Recall outreach to patients overdue for follow-up",
    },
    AgentDefinition {
        name: health_monitor::NAME,
        schedule: health_monitor::SCHEDULE,
        description: "Data store health with transition-only alerting",
    },
    AgentDefinition {
        name: claims_watch::NAME,
        schedule: claims_watch::SCHEDULE,
        description: "Denied-claims volume against a threshold",
    },
    AgentDefinition {
        name: appointment_confirm::NAME,
        schedule: appointment_confirm::SCHEDULE,
        description: "Unconfirmed appointments for the next day",
    },
    AgentDefinition {
        name: credential_expiry::NAME,
        schedule: credential_expiry::SCHEDULE,
        description: "Staff credentials nearing expiry",
    },
    AgentDefinition {
        name: case_briefing::NAME,
        schedule: case_briefing::SCHEDULE,
        description: "Open escalations and per-case briefings",
    },
    AgentDefinition {
        name: daily_digest::NAME,
        schedule: daily_digest::SCHEDULE,
        description: "Morning digest composed from other agents",
    },
];

pub fn agent_names() -> Vec<&'static str> {
    DEFINITIONS.iter().map(|d| d.name).collect()
}

pub fn definition(name: &str) -> Option<&'static AgentDefinition> {
    DEFINITIONS.iter().find(|d| d.name == name)
}

/// Construct one agent. Coordinator dependencies are taken from `existing`
/// when present so they share state with the scheduled instances; missing
/// ones are constructed privately.
pub fn instantiate(
    name: &str,
    ctx: &AgentContext,
    existing: &BTreeMap<String, AgentRef>,
) -> Option<AgentRef> {
    let agent: AgentRef = match name {
        outreach::NAME => Arc::new(outreach::OutreachAgent::new(ctx.clone())),
        health_monitor::NAME => Arc::new(health_monitor::HealthMonitorAgent::new(ctx.clone())),
        claims_watch::NAME => Arc::new(claims_watch::ClaimsWatchAgent::new(ctx.clone())),
        appointment_confirm::NAME => {
            Arc::new(appointment_confirm::AppointmentConfirmAgent::new(ctx.clone()))
        }
        credential_expiry::NAME => {
            Arc::new(credential_expiry::CredentialExpiryAgent::new(ctx.clone()))
        }
        case_briefing::NAME => Arc::new(case_briefing::CaseBriefingAgent::new(ctx.clone())),
        daily_digest::NAME => {
            let dep = |dep_name: &str| {
                existing
                    .get(dep_name)
                    .cloned()
                    .or_else(|| instantiate(dep_name, ctx, existing))
            };
            let deps = daily_digest::DigestSources {
                claims: dep(claims_watch::NAME)?,
                appointments: dep(appointment_confirm::NAME)?,
                escalations: dep(case_briefing::NAME)?,
                health: dep(health_monitor::NAME)?,
            };
            Arc::new(daily_digest::DailyDigestAgent::new(ctx.clone(), deps))
        }
        _ => return None,
    };
    Some(agent)
}

/// Instantiate every enabled agent, in definition order.
pub fn build_enabled(ctx: &AgentContext) -> BTreeMap<String, AgentRef> {
    let mut built = BTreeMap::new();
    for def in DEFINITIONS {
        if !ctx.config.is_agent_enabled(def.name) {
            continue;
        }
        if let Some(agent) = instantiate(def.name, ctx, &built) {
            built.insert(def.name.to_string(), agent);
        }
    }
    built
}
