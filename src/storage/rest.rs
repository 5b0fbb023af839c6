//! Hosted table backend over PostgREST.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::BackendConfig;
use crate::error::SinkError;

/// Longest response body kept in error messages.
const ERROR_BODY_CHARS: usize = 500;

/// Row-level access to remote tables.
#[async_trait]
pub trait TableClient: Send + Sync {
    /// `GET /rest/v1/{table}?select={columns}&{col}=eq.{value}...`
    async fn select(&self, table: &str, columns: &str, filters: &[(&str, &str)]) -> Result<Vec<Value>, SinkError>;

    /// Bulk insert. With `on_conflict`, existing rows are merged instead.
    async fn insert(&self, table: &str, rows: &[Value], on_conflict: Option<&str>) -> Result<(), SinkError>;

    /// `PATCH /rest/v1/{table}?id=eq.{id}`
    async fn update(&self, table: &str, id: &Value, row: &Value) -> Result<(), SinkError>;
}

pub struct RestClient {
    http: reqwest::Client,
    base: String,
    key: String,
}

impl RestClient {
    pub fn new(config: &BackendConfig) -> Result<Self, SinkError> {
        let (base, key) = config.credentials().ok_or(SinkError::NotConfigured("backend url and api key"))?;
        let http = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { http, base: base.trim_end_matches('/').to_string(), key: key.to_string() })
    }

    fn table_url(&self, table: &str) -> Result<Url, SinkError> {
        Ok(Url::parse(&format!("{}/rest/v1/{}", self.base, table))?)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::Remote { status: status.as_u16(), body: body.chars().take(ERROR_BODY_CHARS).collect() })
    }
}

/// PostgREST renders filter values verbatim after the operator.
pub fn eq_filter(value: &Value) -> String {
    match value {
        Value::String(s) => format!("eq.{s}"),
        other => format!("eq.{other}"),
    }
}

#[async_trait]
impl TableClient for RestClient {
    async fn select(&self, table: &str, columns: &str, filters: &[(&str, &str)]) -> Result<Vec<Value>, SinkError> {
        let mut url = self.table_url(table)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("select", columns);
            for (col, value) in filters {
                q.append_pair(col, &format!("eq.{value}"));
            }
        }
        debug!("GET {}", url);
        let resp = Self::check(self.authed(self.http.get(url)).send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn insert(&self, table: &str, rows: &[Value], on_conflict: Option<&str>) -> Result<(), SinkError> {
        let mut url = self.table_url(table)?;
        let prefer = match on_conflict {
            Some(cols) => {
                url.query_pairs_mut().append_pair("on_conflict", cols);
                "resolution=merge-duplicates,return=minimal"
            }
            None => "return=minimal",
        };
        debug!("POST {} ({} rows)", url, rows.len());
        let req = self.authed(self.http.post(url)).header("Prefer", prefer).json(rows);
        Self::check(req.send().await?).await?;
        Ok(())
    }

    async fn update(&self, table: &str, id: &Value, row: &Value) -> Result<(), SinkError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair("id", &eq_filter(id));
        debug!("PATCH {}", url);
        let req = self.authed(self.http.patch(url)).header("Prefer", "return=minimal").json(row);
        Self::check(req.send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// In-memory tables. Rows with `"reject": true` fail any insert they are part of.
    #[derive(Default)]
    pub struct MemoryTables {
        pub tables: Mutex<Vec<(String, Value)>>,
        pub insert_calls: Mutex<usize>,
        pub updates: Mutex<Vec<(String, Value, Value)>>,
    }

    impl MemoryTables {
        pub fn seed(self, table: &str, rows: Vec<Value>) -> Self {
            self.tables.lock().unwrap().extend(rows.into_iter().map(|r| (table.to_string(), r)));
            self
        }

        pub fn rows(&self, table: &str) -> Vec<Value> {
            self.tables.lock().unwrap().iter().filter(|(t, _)| t == table).map(|(_, r)| r.clone()).collect()
        }
    }

    #[async_trait]
    impl TableClient for MemoryTables {
        async fn select(&self, table: &str, _columns: &str, filters: &[(&str, &str)]) -> Result<Vec<Value>, SinkError> {
            Ok(self
                .rows(table)
                .into_iter()
                .filter(|row| filters.iter().all(|(col, v)| row.get(*col).and_then(Value::as_str) == Some(*v)))
                .collect())
        }

        async fn insert(&self, table: &str, rows: &[Value], _on_conflict: Option<&str>) -> Result<(), SinkError> {
            *self.insert_calls.lock().unwrap() += 1;
            if rows.iter().any(|r| r.get("reject") == Some(&Value::Bool(true))) {
                return Err(SinkError::Remote { status: 400, body: "invalid input syntax".into() });
            }
            self.tables.lock().unwrap().extend(rows.iter().map(|r| (table.to_string(), r.clone())));
            Ok(())
        }

        async fn update(&self, table: &str, id: &Value, row: &Value) -> Result<(), SinkError> {
            self.updates.lock().unwrap().push((table.to_string(), id.clone(), row.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unconfigured_backend_is_rejected() {
        let err = RestClient::new(&BackendConfig::default()).err().unwrap();
        assert!(matches!(err, SinkError::NotConfigured(_)));
    }

    #[test]
    fn table_urls_and_filters() {
        let cfg = BackendConfig {
            url: Some("https://db.example.org/".into()),
            api_key: Some("k".into()),
            ..Default::default()
        };
        let client = RestClient::new(&cfg).unwrap();
        assert_eq!(client.table_url("schools").unwrap().as_str(), "https://db.example.org/rest/v1/schools");
        assert_eq!(eq_filter(&json!("abc-123")), "eq.abc-123");
        assert_eq!(eq_filter(&json!(42)), "eq.42");
    }
}
