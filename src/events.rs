//! Append-only event store.
//!
//! Agents that need history across invocations (e.g. how many messages were
//! already sent today) record events here and query them back. The store only
//! appends; nothing is updated or deleted.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub agent: String,
    pub kind: String,
    /// What the event is about (recipient, case id, ...).
    pub subject: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(
        agent: impl Into<String>,
        kind: impl Into<String>,
        subject: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent: agent.into(),
            kind: kind.into(),
            subject: subject.into(),
            at,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Selects events; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub agent: Option<String>,
    pub kind: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.agent.as_deref().map_or(true, |a| a == event.agent)
            && self.kind.as_deref().map_or(true, |k| k == event.kind)
            && self.since.map_or(true, |s| event.at >= s)
    }
}

/// Narrow append/query interface over whatever persistence is configured.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record(&self, event: Event) -> anyhow::Result<()>;

    /// Matching events in recording order.
    async fn query(&self, filter: &EventFilter) -> anyhow::Result<Vec<Event>>;
}

/// Shared event store.
pub type SharedEventStore = Arc<dyn EventStore>;

/// Process-local store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record(&self, event: Event) -> anyhow::Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn query(&self, filter: &EventFilter) -> anyhow::Result<Vec<Event>> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }
}

/// JSON-lines file, one event per line.
#[derive(Debug)]
pub struct JsonlEventStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn record(&self, event: Event) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn query(&self, filter: &EventFilter) -> anyhow::Result<Vec<Event>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) if filter.matches(&event) => out.push(event),
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    "Skipping malformed event at {}:{}: {}",
                    self.path.display(),
                    n + 1,
                    e
                ),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    async fn exercise(store: &dyn EventStore) {
        store.record(Event::new("outreach", "sent", "a@x.org", at(9))).await.unwrap();
        store.record(Event::new("outreach", "sent", "b@x.org", at(11))).await.unwrap();
        store.record(Event::new("outreach", "skipped", "c@x.org", at(11))).await.unwrap();
        store.record(Event::new("claims-watch", "sent", "ops", at(12))).await.unwrap();

        let sent_today = store
            .query(&EventFilter::default().agent("outreach").kind("sent").since(at(10)))
            .await
            .unwrap();
        assert_eq!(sent_today.len(), 1);
        assert_eq!(sent_today[0].subject, "b@x.org");

        let all = store.query(&EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].subject, "a@x.org");
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryEventStore::new()).await;
    }

    #[tokio::test]
    async fn test_jsonl_store_appends_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events").join("log.jsonl");

        exercise(&JsonlEventStore::new(&path)).await;

        let reopened = JsonlEventStore::new(&path);
        assert_eq!(reopened.query(&EventFilter::default()).await.unwrap().len(), 4);

        tokio::fs::write(&path, "not json\n").await.unwrap();
        assert!(reopened.query(&EventFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::new(dir.path().join("absent.jsonl"));
        assert!(store.query(&EventFilter::default()).await.unwrap().is_empty());
    }
}
