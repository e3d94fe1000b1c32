//! Read-only data access.
//!
//! Agents read shared operational data through [`ReadOnlyDb`]. Two independent
//! layers keep that path read-only:
//! 1. a textual check: after trimming, the statement must start with
//!    `SELECT` or `WITH` (case-insensitive), otherwise it is rejected with
//!    [`DataError::ReadOnlyViolation`] before the backend is touched;
//! 2. every [`QueryBackend`] is read-only at the transport level (read-only
//!    SQLite connections with `query_only`, PostgREST `GET` RPCs which run in
//!    a READ ONLY transaction).
//!
//! Backend failures are logged and returned as-is. There are no retries.

mod postgrest;
mod sqlite;

pub use postgrest::PostgrestBackend;
pub use sqlite::SqliteBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::DataError;
use crate::logging::{AgentLogger, Logger};

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Transport behind the guard. Implementations must reject writes themselves.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Short label used in log records.
    fn name(&self) -> &str;

    /// Execute a statement with positional parameters.
    async fn fetch(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, DataError>;
}

/// Check that `statement` is a read. Leading whitespace and case are ignored.
pub fn ensure_read_only(statement: &str) -> Result<(), DataError> {
    let trimmed = statement.trim_start();
    let keyword: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => Ok(()),
        _ => Err(DataError::ReadOnlyViolation(preview(trimmed))),
    }
}

fn preview(statement: &str) -> String {
    const MAX: usize = 60;
    let mut out: String = statement.chars().take(MAX).collect();
    if statement.chars().count() > MAX {
        out.push_str("...");
    }
    out
}

/// Guarded query surface shared by all agents.
#[derive(Clone)]
pub struct ReadOnlyDb {
    backend: Arc<dyn QueryBackend>,
    log: AgentLogger,
}

impl ReadOnlyDb {
    pub fn new(backend: Arc<dyn QueryBackend>, logger: &Logger) -> Self {
        Self {
            backend,
            log: logger.for_agent("db"),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run a read-only statement.
    pub async fn query(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, DataError> {
        if let Err(e) = ensure_read_only(statement) {
            self.log.error(format!("Rejected statement: {}", e));
            return Err(e);
        }

        match self.backend.fetch(statement, params).await {
            Ok(rows) => {
                self.log.debug(format!(
                    "{} returned {} row(s)",
                    self.backend.name(),
                    rows.len()
                ));
                Ok(rows)
            }
            Err(e) => {
                self.log.error(format!("{} query failed: {}", self.backend.name(), e));
                Err(e)
            }
        }
    }

    /// Run a read-only statement and decode each row into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        statement: &str,
        params: &[Value],
    ) -> Result<Vec<T>, DataError> {
        self.query(statement, params)
            .await?
            .into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|e| DataError::Decode(e.to_string()))
            })
            .collect()
    }

    /// Connectivity probe.
    pub async fn ping(&self) -> Result<(), DataError> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

impl std::fmt::Debug for ReadOnlyDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyDb")
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Backends used by tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Answers statements by substring match; counts calls.
    #[derive(Default)]
    pub struct ScriptedBackend {
        responses: Mutex<HashMap<String, Result<Vec<Row>, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Rows returned for any statement containing `needle`.
        pub fn on(self, needle: &str, rows: Vec<Value>) -> Self {
            let rows = rows
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(m) => Some(m),
                    _ => None,
                })
                .collect();
            self.responses
                .lock()
                .unwrap()
                .insert(needle.to_string(), Ok(rows));
            self
        }

        /// Failure returned for any statement containing `needle`.
        pub fn fail_on(self, needle: &str, message: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(needle.to_string(), Err(message.to_string()));
            self
        }

        pub fn set(&self, needle: &str, rows: Result<Vec<Row>, String>) {
            self.responses
                .lock()
                .unwrap()
                .insert(needle.to_string(), rows);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, statement: &str, _params: &[Value]) -> Result<Vec<Row>, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            let hit = responses
                .iter()
                .filter(|(needle, _)| statement.contains(needle.as_str()))
                .max_by_key(|(needle, _)| needle.len());
            match hit {
                Some((_, Ok(rows))) => Ok(rows.clone()),
                Some((_, Err(message))) => Err(DataError::Backend(message.clone())),
                None => Ok(Vec::new()),
            }
        }
    }
}
