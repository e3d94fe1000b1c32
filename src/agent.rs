//! The contract every agent implements, and the context it is built with.
//!
//! An agent has a stable name, an optional cron schedule, and a single
//! required operation, [`AgentUnit::run`]. Agents may also expose a cheap
//! [`AgentUnit::status`] snapshot and named sub-operations keyed by an
//! external identifier (e.g. "briefing for case 42").
//!
//! Agents receive everything they touch through [`AgentContext`]: there is no
//! global state. Outbound actions must go through `ctx.dispatcher`, which
//! applies the simulation and capability gates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::ConfigStore;
use crate::db::ReadOnlyDb;
use crate::error::{AgentError, DataError};
use crate::events::{MemoryEventStore, SharedEventStore};
use crate::llm::LanguageModel;
use crate::logging::{AgentLogger, Logger};
use crate::notify::{Dispatcher, Notifier, UnconfiguredNotifier};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of one agent run or sub-operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub agent: String,
    pub summary: String,
    /// Items handled this run.
    pub processed: usize,
    /// Items seen but left for later.
    pub skipped: usize,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(
        agent: impl Into<String>,
        summary: impl Into<String>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent: agent.into(),
            summary: summary.into(),
            processed: 0,
            skipped: 0,
            details: Value::Null,
            finished_at,
        }
    }

    pub fn counts(mut self, processed: usize, skipped: usize) -> Self {
        self.processed = processed;
        self.skipped = skipped;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Cheap, side-effect-free view of an agent's last known state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub agent: String,
    pub state: String,
    pub last_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// Contract implemented by every agent.
#[async_trait]
pub trait AgentUnit: Send + Sync {
    /// Unique, stable name.
    fn name(&self) -> &str;

    /// Cron expression, or `None` for on-demand only.
    fn schedule(&self) -> Option<&str>;

    /// Do one unit of work. Per-item failures are handled inside; an `Err`
    /// means the run as a whole could not proceed.
    async fn run(&self) -> Result<RunReport, AgentError>;

    fn status(&self) -> Option<StatusSnapshot> {
        None
    }

    /// Names accepted by [`AgentUnit::invoke`].
    fn operations(&self) -> &[&'static str] {
        &[]
    }

    /// Run a named sub-operation for an external identifier.
    async fn invoke(&self, operation: &str, _id: &str) -> Result<RunReport, AgentError> {
        Err(AgentError::UnknownOperation {
            agent: self.name().to_string(),
            operation: operation.to_string(),
        })
    }
}

/// Reference-counted agent handle.
pub type AgentRef = Arc<dyn AgentUnit>;

/// Explicit dependencies handed to every agent and to the scheduler.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<ConfigStore>,
    pub logger: Logger,
    /// `None` when no data source is configured.
    pub db: Option<ReadOnlyDb>,
    pub dispatcher: Dispatcher,
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub events: SharedEventStore,
    pub clock: Arc<dyn Clock>,
}

impl AgentContext {
    /// Context with no data source, no delivery channel and no model.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let notifier: Arc<dyn Notifier> = Arc::new(UnconfiguredNotifier);
        Self {
            logger: Logger::new(config.log_level()),
            dispatcher: Dispatcher::new(Arc::clone(&config), notifier),
            config,
            db: None,
            llm: None,
            events: Arc::new(MemoryEventStore::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_db(mut self, db: ReadOnlyDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.dispatcher = Dispatcher::new(Arc::clone(&self.config), notifier);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_events(mut self, events: SharedEventStore) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn log_for(&self, agent: &str) -> AgentLogger {
        self.logger.for_agent(agent)
    }

    /// The data source, or an error for agents that cannot run without one.
    pub fn require_db(&self) -> Result<&ReadOnlyDb, AgentError> {
        self.db
            .as_ref()
            .ok_or_else(|| AgentError::Data(DataError::Backend("no data source configured".into())))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("global", &self.config.global())
            .field("db", &self.db)
            .field("llm", &self.llm.is_some())
            .finish_non_exhaustive()
    }
}
