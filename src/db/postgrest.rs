//! PostgREST (Supabase) backend.
//!
//! Statements are executed by a `run_readonly_query(statement text, params jsonb)`
//! SQL function exposed over RPC. The call is always a `GET`, which PostgREST
//! runs inside a READ ONLY transaction, and it authenticates with a key whose
//! role only holds read grants.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::{QueryBackend, Row};
use crate::error::DataError;

const QUERY_FUNCTION: &str = "run_readonly_query";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only client for the PostgREST API.
pub struct PostgrestBackend {
    client: Client,
    url: String,
    readonly_key: String,
}

impl PostgrestBackend {
    /// Create a new client. `url` is the project root (`https://<ref>.supabase.co`).
    pub fn new(url: &str, readonly_key: &str) -> Result<Self, DataError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            readonly_key: readonly_key.to_string(),
        })
    }

    /// Get the PostgREST URL.
    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn request_url(&self, statement: &str, params: &[Value]) -> String {
        let params = Value::Array(params.to_vec()).to_string();
        format!(
            "{}/rpc/{}?statement={}&params={}",
            self.rest_url(),
            QUERY_FUNCTION,
            urlencoding::encode(statement),
            urlencoding::encode(&params)
        )
    }
}

#[async_trait]
impl QueryBackend for PostgrestBackend {
    fn name(&self) -> &str {
        "postgrest"
    }

    async fn fetch(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, DataError> {
        let resp = self
            .client
            .get(self.request_url(statement, params))
            .header("apikey", &self.readonly_key)
            .header("Authorization", format!("Bearer {}", self.readonly_key))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(DataError::Backend(format!("{} - {}", status, text)));
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| DataError::Decode(e.to_string()))?;

        match body {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(DataError::Decode(format!("expected row object, got {}", other))),
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(DataError::Decode(format!("expected row array, got {}", other))),
        }
    }
}
