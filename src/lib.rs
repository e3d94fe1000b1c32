//! # carewatch
//!
//! Agent orchestration and safety gating for clinic operations.
//!
//! A process loads a fixed set of agents, arms the enabled ones on cron
//! schedules, and lets operators trigger them by hand. Agents only read
//! shared data, and every outbound action (alert, email, notification) passes
//! two gates before anything leaves the process:
//!
//! ```text
//!   agent ──► Dispatcher ──► simulation on?  ──yes──► log, not sent
//!                 │
//!                 └────────► capability off? ──yes──► log, not sent
//!                 │
//!                 └────────► Notifier::send
//! ```
//!
//! ## Modules
//! - `config`: environment settings, simulation switch, per-agent capabilities
//! - `db`: read-only data access (SQLite, PostgREST)
//! - `notify`: outbound actions and their gate
//! - `agent` / `agents`: the agent contract and the concrete agents
//! - `registry`: the static list of known agents
//! - `scheduler`: cron jobs and manual triggers
//! - `api`: HTTP introspection

pub mod agent;
pub mod agents;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod schedule;
pub mod scheduler;

pub use agent::{AgentContext, AgentRef, AgentUnit, RunReport, StatusSnapshot};
pub use config::{ConfigStore, SharedConfigStore};
pub use error::{AgentError, DataError, ExternalServiceError, TriggerError};
pub use scheduler::{Scheduler, StatusReport};
