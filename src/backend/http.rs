//! HTTP backend for a data manager's public API.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::backend::{BackendError, ContentBackend, EntryOptions};
use crate::keys::ListOptions;

/// Reads entries from `{base_url}/{short_id}/{model}`.
#[derive(Debug, Clone)]
pub struct PublicApiBackend {
    client: Client,
    base_url: String,
    short_id: String,
}

impl PublicApiBackend {
    pub fn new(base_url: impl Into<String>, short_id: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, short_id)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        short_id: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            short_id: short_id.into(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/{}", self.base_url, self.short_id)
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/{}", self.api_url(), model)
    }

    async fn read_json(response: Response, what: String) -> Result<Value, BackendError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(what));
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

/// Query parameters for a single-entry fetch.
fn entry_query(entry_id: &str, options: &EntryOptions) -> Vec<(String, String)> {
    let mut query = vec![("id".to_string(), entry_id.to_string())];
    if options.levels > 1 {
        query.push(("_levels".to_string(), options.levels.to_string()));
    }
    if let Some(fields) = options.fields.as_ref().filter(|f| !f.is_empty()) {
        query.push(("_fields".to_string(), fields.join(",")));
    }
    query
}

/// Filter options flattened into query parameters.
fn list_query(filter: &ListOptions) -> Vec<(String, String)> {
    filter
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}

#[async_trait]
impl ContentBackend for PublicApiBackend {
    fn short_id(&self) -> &str {
        &self.short_id
    }

    async fn get_entry(
        &self,
        model: &str,
        entry_id: &str,
        options: &EntryOptions,
    ) -> Result<Value, BackendError> {
        let url = self.model_url(model);
        debug!(%url, entry_id, "fetching entry");
        let response = self
            .client
            .get(&url)
            .query(&entry_query(entry_id, options))
            .send()
            .await?;
        Self::read_json(response, format!("{model}/{entry_id}")).await
    }

    async fn get_entries(&self, model: &str, filter: &ListOptions) -> Result<Value, BackendError> {
        let url = self.model_url(model);
        debug!(%url, "fetching entry list");
        let response = self
            .client
            .get(&url)
            .query(&list_query(filter))
            .send()
            .await?;
        Self::read_json(response, model.to_string()).await
    }

    async fn get_config(&self) -> Result<Value, BackendError> {
        let response = self.client.get(self.api_url()).send().await?;
        Self::read_json(response, self.short_id.clone()).await
    }
}
