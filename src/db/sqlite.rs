//! SQLite backend over read-only connections.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use super::{QueryBackend, Row};
use crate::error::DataError;

/// Default number of pooled connections.
const DEFAULT_POOL_SIZE: usize = 4;

/// Pool of read-only SQLite connections shared by concurrent callers.
///
/// Connections are opened with `SQLITE_OPEN_READ_ONLY` and
/// `PRAGMA query_only = ON`, so writes fail inside SQLite even when a
/// statement gets past the textual guard.
pub struct SqliteBackend {
    path: PathBuf,
    idle: Arc<Mutex<Vec<Connection>>>,
    permits: Arc<Semaphore>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        Self::with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(path: impl AsRef<Path>, size: usize) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        let size = size.max(1);
        let connections = (0..size)
            .map(|_| open_read_only(&path))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            "Opened {} read-only SQLite connection(s) to {}",
            size,
            path.display()
        );

        Ok(Self {
            path,
            idle: Arc::new(Mutex::new(connections)),
            permits: Arc::new(Semaphore::new(size)),
        })
    }

    fn checkout(&self) -> Result<Connection, DataError> {
        let pooled = self
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => open_read_only(&self.path),
        }
    }

    fn checkin(&self, conn: Connection) {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(conn);
    }
}

fn open_read_only(path: &Path) -> Result<Connection, DataError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.pragma_update(None, "query_only", true)?;
    Ok(conn)
}

#[async_trait]
impl QueryBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, DataError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| DataError::Backend(format!("connection pool closed: {}", e)))?;

        let conn = self.checkout()?;
        let statement = statement.to_string();
        let params: Vec<SqlValue> = params.iter().map(to_sql).collect();

        let joined = tokio::task::spawn_blocking(move || {
            let result = run_statement(&conn, &statement, params);
            (conn, result)
        })
        .await;

        match joined {
            Ok((conn, result)) => {
                self.checkin(conn);
                result
            }
            // The connection went down with the worker; the next checkout reopens one.
            Err(e) => Err(DataError::Backend(format!("query worker failed: {}", e))),
        }
    }
}

fn run_statement(
    conn: &Connection,
    statement: &str,
    params: Vec<SqlValue>,
) -> Result<Vec<Row>, DataError> {
    let mut stmt = conn.prepare(statement)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), from_sql(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => json!(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ReadOnlyDb;
    use crate::logging::Logger;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE patients (id INTEGER PRIMARY KEY, name TEXT, balance REAL);
             INSERT INTO patients (id, name, balance) VALUES (1, 'Ada', 12.5), (2, 'Grace', NULL);",
        )
        .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_select_with_params() {
        let (_dir, path) = fixture();
        let backend = SqliteBackend::with_pool_size(&path, 2).unwrap();

        let rows = backend
            .fetch("SELECT id, name, balance FROM patients WHERE id = ?1", &[json!(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Ada"));
        assert_eq!(rows[0]["balance"], json!(12.5));

        let rows = backend
            .fetch("SELECT balance FROM patients WHERE id = ?1", &[json!(2)])
            .await
            .unwrap();
        assert_eq!(rows[0]["balance"], Value::Null);
    }

    #[tokio::test]
    async fn test_backend_rejects_writes_past_the_guard() {
        let (_dir, path) = fixture();
        let backend = SqliteBackend::open(&path).unwrap();

        // Straight to the backend, skipping the textual check.
        let err = backend
            .fetch("UPDATE patients SET name = 'x'", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Backend(_)));

        // Passes the textual check but still writes.
        let db = ReadOnlyDb::new(Arc::new(backend), &Logger::default());
        let err = db
            .query("WITH doomed AS (SELECT 1) DELETE FROM patients", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Backend(_)));

        let rows = db.query("SELECT count(*) AS n FROM patients", &[]).await.unwrap();
        assert_eq!(rows[0]["n"], json!(2));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_pool() {
        let (_dir, path) = fixture();
        let backend = Arc::new(SqliteBackend::with_pool_size(&path, 2).unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move {
                    backend
                        .fetch("SELECT count(*) AS n FROM patients", &[])
                        .await
                        .map(|rows| rows[0]["n"].clone())
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), json!(2));
        }
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteBackend::open(dir.path().join("absent.db")).is_err());
    }
}
