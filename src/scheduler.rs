//! Cron-driven job runner.
//!
//! `start()` instantiates every enabled agent and arms one job per agent that
//! has a schedule. A job is a tokio task that sleeps until the next firing,
//! then runs the agent in a task of its own so that an error or a panic is
//! logged and the job keeps going. A firing that arrives while the previous
//! run of the same job is still in flight is skipped.
//!
//! Manual triggers go straight to the agent and do not touch the jobs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::agent::{AgentContext, AgentRef, Clock, RunReport, StatusSnapshot};
use crate::error::TriggerError;
use crate::logging::AgentLogger;
use crate::registry;
use crate::schedule::CronSchedule;

/// Builds the agents a scheduler runs.
pub type AgentBuilder = Arc<dyn Fn(&AgentContext) -> BTreeMap<String, AgentRef> + Send + Sync>;

/// Snapshot of global state for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub simulation_mode: bool,
    pub enabled_agents: Vec<String>,
    pub total_agents: usize,
}

/// One row of the agent listing.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub schedule: Option<String>,
    pub enabled: bool,
    pub scheduled: bool,
    pub operations: Vec<String>,
    pub status: Option<StatusSnapshot>,
}

struct Job {
    schedule: CronSchedule,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    running: bool,
    agents: BTreeMap<String, AgentRef>,
    jobs: BTreeMap<String, Job>,
}

pub struct Scheduler {
    ctx: AgentContext,
    build: AgentBuilder,
    log: AgentLogger,
    inner: Mutex<Inner>,
}

impl Scheduler {
    /// Scheduler over the static registry.
    pub fn new(ctx: AgentContext) -> Self {
        Self::with_builder(ctx, Arc::new(registry::build_enabled))
    }

    pub fn with_builder(ctx: AgentContext, build: AgentBuilder) -> Self {
        Self {
            log: ctx.log_for("scheduler"),
            ctx,
            build,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build the enabled agents and arm their jobs. No-op while running.
    pub fn start(&self) {
        let mut inner = self.lock();
        if inner.running {
            self.log.warn("Scheduler already running; start ignored");
            return;
        }

        let agents = (self.build)(&self.ctx);
        let mut jobs = BTreeMap::new();
        for (name, agent) in &agents {
            let Some(expr) = agent.schedule() else {
                self.log.debug(format!("{} is on-demand only", name));
                continue;
            };
            let schedule = match CronSchedule::parse(expr) {
                Ok(s) => s,
                Err(e) => {
                    self.log.error(format!(
                        "Not scheduling {}: bad schedule {:?}: {}",
                        name, expr, e
                    ));
                    continue;
                }
            };

            let handle = tokio::spawn(run_job(
                Arc::clone(agent),
                schedule.clone(),
                Arc::clone(&self.ctx.clock),
                self.ctx.log_for(name.as_str()),
            ));
            self.log.info(format!("Scheduled {} ({})", name, schedule));
            jobs.insert(name.clone(), Job { schedule, handle });
        }

        self.log.success(format!(
            "Scheduler started: {} agent(s), {} job(s)",
            agents.len(),
            jobs.len()
        ));
        inner.agents = agents;
        inner.jobs = jobs;
        inner.running = true;
    }

    /// Cancel every job. Runs already in flight finish on their own.
    pub fn stop(&self) {
        let mut inner = self.lock();
        let jobs = std::mem::take(&mut inner.jobs);
        for job in jobs.values() {
            job.handle.abort();
        }
        inner.agents.clear();
        if inner.running {
            self.log.info(format!("Scheduler stopped; {} job(s) cancelled", jobs.len()));
        }
        inner.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn job_names(&self) -> Vec<String> {
        self.lock().jobs.keys().cloned().collect()
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.lock().jobs.contains_key(name)
    }

    /// Schedule expression of an armed job.
    pub fn job_schedule(&self, name: &str) -> Option<String> {
        self.lock().jobs.get(name).map(|j| j.schedule.to_string())
    }

    /// Current configuration, re-read first.
    pub fn status(&self) -> StatusReport {
        self.ctx.config.reload();
        StatusReport {
            simulation_mode: self.ctx.config.is_simulation_mode(),
            enabled_agents: self.ctx.config.enabled_agent_names().into_iter().collect(),
            total_agents: self.ctx.config.known_agents().len(),
        }
    }

    /// Running instance if there is one, else a fresh one from the registry.
    fn resolve(&self, name: &str) -> Result<AgentRef, TriggerError> {
        let running = self.lock().agents.clone();
        if let Some(agent) = running.get(name) {
            return Ok(Arc::clone(agent));
        }
        if !self.ctx.config.is_agent_enabled(name) && registry::definition(name).is_some() {
            self.log.warn(format!("{} is disabled; running on request anyway", name));
        }
        registry::instantiate(name, &self.ctx, &running)
            .ok_or_else(|| TriggerError::UnknownAgent(name.to_string()))
    }

    /// Run an agent once, now.
    pub async fn trigger(&self, name: &str) -> Result<RunReport, TriggerError> {
        let agent = self.resolve(name)?;
        self.log.info(format!("Manual run of {}", name));
        agent.run().await.map_err(|source| TriggerError::Run {
            agent: name.to_string(),
            source,
        })
    }

    /// Run a named sub-operation of an agent.
    pub async fn invoke(
        &self,
        name: &str,
        operation: &str,
        id: &str,
    ) -> Result<RunReport, TriggerError> {
        let agent = self.resolve(name)?;
        self.log.info(format!("Manual {} of {} for {}", operation, name, id));
        agent.invoke(operation, id).await.map_err(|source| TriggerError::Run {
            agent: name.to_string(),
            source,
        })
    }

    /// Every known agent with its configuration and last status.
    pub fn agent_statuses(&self) -> Vec<AgentInfo> {
        let (running, jobs) = {
            let inner = self.lock();
            (inner.agents.clone(), inner.jobs.keys().cloned().collect::<Vec<_>>())
        };

        registry::DEFINITIONS
            .iter()
            .map(|def| {
                let agent = running
                    .get(def.name)
                    .cloned()
                    .or_else(|| registry::instantiate(def.name, &self.ctx, &running));
                AgentInfo {
                    name: def.name.to_string(),
                    description: def.description.to_string(),
                    schedule: def.schedule.map(str::to_string),
                    enabled: self.ctx.config.is_agent_enabled(def.name),
                    scheduled: jobs.iter().any(|j| j == def.name),
                    operations: agent
                        .as_ref()
                        .map(|a| a.operations().iter().map(|o| o.to_string()).collect())
                        .unwrap_or_default(),
                    status: running.get(def.name).and_then(|a| a.status()),
                }
            })
            .collect()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Loop of one job: sleep until the next firing, start a run unless the
/// previous one is still going, repeat.
async fn run_job(agent: AgentRef, schedule: CronSchedule, clock: Arc<dyn Clock>, log: AgentLogger) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = clock.now();
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.next_after(from) else {
            log.warn(format!("Schedule {} never fires again; job ends", schedule));
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        log.debug(format!("Next run at {}", next.to_rfc3339()));
        tokio::time::sleep(wait).await;
        last_fire = Some(next);

        if in_flight.swap(true, Ordering::SeqCst) {
            log.warn("Previous run still in progress; skipping this one");
            continue;
        }

        let agent = Arc::clone(&agent);
        let guard = Arc::clone(&in_flight);
        let log = log.clone();
        tokio::spawn(async move {
            let outcome = tokio::spawn(async move { agent.run().await }).await;
            match outcome {
                Ok(Ok(report)) => log.info(format!("Run finished: {}", report.summary)),
                Ok(Err(e)) => log.error(format!("Run failed: {}", e)),
                Err(e) if e.is_panic() => log.error("Run panicked"),
                Err(e) => log.error(format!("Run aborted: {}", e)),
            }
            guard.store(false, Ordering::SeqCst);
        });
    }
}
