use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

use super::{ClientError, Connector, SearchClient};
use crate::types::{IndexBody, LiveIndexState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Get,
    Create,
    PutMapping,
    Delete,
}

/// Shares one connection pool across every endpoint it connects to.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http_client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http_client })
    }
}

impl Connector for HttpConnector {
    type Client = HttpSearchClient;

    fn connect(&self, endpoint: &str) -> Result<HttpSearchClient, ClientError> {
        HttpSearchClient::new(self.http_client.clone(), endpoint)
    }
}

/// HTTP client for the index administration API of a single cluster.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    http_client: reqwest::Client,
    endpoint: String,
    base_url: Url,
}

impl HttpSearchClient {
    pub fn new(http_client: reqwest::Client, endpoint: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(endpoint).map_err(|e| ClientError::Rejected {
            status: 0,
            reason: format!("invalid endpoint '{endpoint}': {e}"),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Rejected {
                status: 0,
                reason: format!("endpoint '{endpoint}' cannot carry an index path"),
            });
        }
        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            base_url,
        })
    }

    fn index_url(&self, name: &str, suffix: Option<&str>) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| ClientError::Rejected {
                status: 0,
                reason: format!("endpoint '{}' cannot carry an index path", self.endpoint),
            })?;
            segments.pop_if_empty().push(name);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                "request timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            ClientError::Transport(format!("{kind} for {}: {e}", self.endpoint))
        })
    }

    async fn expect_success(
        &self,
        op: Operation,
        response: reqwest::Response,
    ) -> Result<(), ClientError> {
        if response.status().is_success() {
            return Ok(());
        }
        Err(error_from_response(op, response).await)
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_index(&self, name: &str) -> Result<LiveIndexState, ClientError> {
        let url = self.index_url(name, None)?;
        tracing::debug!(index = name, endpoint = %self.endpoint, "GET index");
        let response = self.send(self.http_client.get(url)).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(LiveIndexState::absent());
        }
        if !response.status().is_success() {
            return Err(error_from_response(Operation::Get, response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("index state for '{name}': {e}")))?;
        parse_index_state(name, &body)
    }

    async fn create(&self, name: &str, body: &IndexBody) -> Result<(), ClientError> {
        let url = self.index_url(name, None)?;
        tracing::debug!(index = name, endpoint = %self.endpoint, "PUT index");
        let response = self.send(self.http_client.put(url).json(body)).await?;
        self.expect_success(Operation::Create, response).await
    }

    async fn put_mapping(&self, name: &str, delta: &Value) -> Result<(), ClientError> {
        let url = self.index_url(name, Some("_mapping"))?;
        tracing::debug!(index = name, endpoint = %self.endpoint, "PUT index mapping");
        let response = self.send(self.http_client.put(url).json(delta)).await?;
        self.expect_success(Operation::PutMapping, response).await
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        let url = self.index_url(name, None)?;
        tracing::debug!(index = name, endpoint = %self.endpoint, "DELETE index");
        let response = self.send(self.http_client.delete(url)).await?;
        self.expect_success(Operation::Delete, response).await
    }
}

/// `GET /{index}` answers `{ "<index>": { "mappings": .., "settings": .. } }`.
/// When `name` is an alias the key is the concrete index, so fall back to the
/// single entry. An alias over several indices has no one live state.
fn parse_index_state(name: &str, body: &Value) -> Result<LiveIndexState, ClientError> {
    let entry = match body.get(name) {
        Some(entry) => entry,
        None => {
            let entries = body.as_object().map(|m| m.len()).unwrap_or(0);
            if entries > 1 {
                return Err(ClientError::Decode(format!(
                    "'{name}' resolves to {entries} indices, expected one"
                )));
            }
            body.as_object()
                .and_then(|m| m.values().next())
                .ok_or_else(|| ClientError::Decode(format!("response has no entry for '{name}'")))?
        }
    };

    let as_map = |key: &str| -> Map<String, Value> {
        entry
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    };
    Ok(LiveIndexState::present(as_map("mappings"), as_map("settings")))
}

async fn error_from_response(op: Operation, response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body_text = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read response body".into());
    let (error_type, reason) = parse_error_body(&body_text);
    classify(op, status, error_type.as_deref(), reason)
}

/// Extract `(error.type, error.reason)` from an engine error body, falling
/// back to the raw text.
fn parse_error_body(text: &str) -> (Option<String>, String) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return (None, text.trim().to_string());
    };
    match value.get("error") {
        Some(Value::Object(err)) => {
            let error_type = err.get("type").and_then(Value::as_str).map(String::from);
            let reason = err
                .get("reason")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| text.trim().to_string());
            (error_type, reason)
        }
        Some(Value::String(s)) => (None, s.clone()),
        _ => (None, text.trim().to_string()),
    }
}

fn classify(op: Operation, status: u16, error_type: Option<&str>, reason: String) -> ClientError {
    match status {
        404 => ClientError::NotFound(reason),
        409 if op == Operation::Create => ClientError::AlreadyExists(reason),
        // Concurrent cluster-state updates; the same request can succeed later.
        409 => ClientError::Unavailable { status, reason },
        400 if error_type == Some("resource_already_exists_exception") => {
            ClientError::AlreadyExists(reason)
        }
        400 if op == Operation::PutMapping
            && error_type == Some("illegal_argument_exception")
            && is_mapping_conflict_reason(&reason) =>
        {
            ClientError::MappingConflict(reason)
        }
        429 | 500..=599 => ClientError::Unavailable { status, reason },
        _ => ClientError::Rejected { status, reason },
    }
}

fn is_mapping_conflict_reason(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("cannot be changed from")
        || reason.contains("mapper [")
        || reason.contains("conflicts with existing mapping")
}
