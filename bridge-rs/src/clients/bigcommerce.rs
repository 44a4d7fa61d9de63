//! BigCommerce REST target client

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{CreatedRecord, TargetClient, TargetCredentials, WriteError};
use crate::migration::EntityKind;

const DEFAULT_API_BASE: &str = "https://api.bigcommerce.com/stores";

/// Write client for a BigCommerce store
pub struct BigCommerceClient {
    credentials: TargetCredentials,
    client: reqwest::Client,
}

impl BigCommerceClient {
    pub fn new(credentials: TargetCredentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
        }
    }

    fn base(&self) -> String {
        let api_base = self
            .credentials
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!("{}/{}", api_base, self.credentials.store_hash)
    }

    /// Collection path for an entity; reviews are nested under their product
    fn path(kind: EntityKind, payload: &Value) -> Result<String, WriteError> {
        let path = match kind {
            EntityKind::Categories => "v3/catalog/categories".to_string(),
            EntityKind::Products => "v3/catalog/products".to_string(),
            EntityKind::Customers => "v3/customers".to_string(),
            EntityKind::Orders => "v2/orders".to_string(),
            EntityKind::Coupons => "v2/coupons".to_string(),
            EntityKind::Pages => "v3/content/pages".to_string(),
            EntityKind::Posts => "v2/blog/posts".to_string(),
            EntityKind::Reviews => {
                let product_id = payload
                    .get("product_id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| WriteError::Fatal("review has no product_id".to_string()))?;
                format!("v3/catalog/products/{}/reviews", product_id)
            }
        };
        Ok(path)
    }

    /// Collection path and filter that find an item by its natural key
    fn lookup(kind: EntityKind, payload: &Value) -> Option<(&'static str, Vec<(&'static str, String)>)> {
        let text = |field: &str| {
            payload
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match kind {
            EntityKind::Categories => {
                let parent_id = payload.get("parent_id").and_then(Value::as_u64).unwrap_or(0);
                Some((
                    "v3/catalog/categories",
                    vec![("name", text("name")?), ("parent_id", parent_id.to_string())],
                ))
            }
            EntityKind::Products => Some(("v3/catalog/products", vec![("sku", text("sku")?)])),
            EntityKind::Customers => Some(("v3/customers", vec![("email:in", text("email")?)])),
            EntityKind::Coupons => Some(("v2/coupons", vec![("code", text("code")?)])),
            _ => None,
        }
    }

    /// Endpoints that take a JSON array of items
    fn is_batch_endpoint(kind: EntityKind) -> bool {
        matches!(kind, EntityKind::Customers | EntityKind::Pages)
    }

    fn body(kind: EntityKind, payload: &Value) -> Value {
        let mut payload = payload.clone();
        if kind == EntityKind::Reviews {
            if let Some(obj) = payload.as_object_mut() {
                obj.remove("product_id");
            }
        }
        if Self::is_batch_endpoint(kind) {
            Value::Array(vec![payload])
        } else {
            payload
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, WriteError> {
        request
            .header("X-Auth-Token", &self.credentials.access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| WriteError::Transient(e.to_string()))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        kind: EntityKind,
    ) -> Result<CreatedRecord, WriteError> {
        let response = self.execute(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            debug!("BigCommerce {} write returned {}: {}", kind, status, text);
            return Err(classify(status, &headers, &text));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| WriteError::Fatal(format!("unreadable response: {}", e)))?;
        extract_id(&body)
            .map(|id| CreatedRecord { id })
            .ok_or_else(|| WriteError::Fatal("response did not contain an id".to_string()))
    }
}

/// Map an error response to a write outcome
pub fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> WriteError {
    let lower = body.to_ascii_lowercase();
    let looks_duplicate = ["duplicate", "already exists", "already in use", "unique", "taken"]
        .iter()
        .any(|needle| lower.contains(needle));

    match status {
        StatusCode::CONFLICT => WriteError::Duplicate {
            existing_id: None,
            message: summarize(body),
        },
        StatusCode::UNPROCESSABLE_ENTITY if looks_duplicate => WriteError::Duplicate {
            existing_id: None,
            message: summarize(body),
        },
        StatusCode::TOO_MANY_REQUESTS => WriteError::RateLimited {
            retry_after: headers
                .get("x-rate-limit-time-reset-ms")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis),
        },
        s if s.is_server_error() => WriteError::Transient(format!("{} {}", s, summarize(body))),
        s => WriteError::Fatal(format!("{} {}", s, summarize(body))),
    }
}

fn summarize(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("title")
                .or_else(|| v.pointer("/0/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// ID of a record in v2 (`{id}`, `[{id}]`) or v3 (`{data: {id}}`, `{data: [{id}]}`) shape
pub fn extract_id(body: &Value) -> Option<u64> {
    body.pointer("/data/id")
        .or_else(|| body.pointer("/data/0/id"))
        .or_else(|| body.get("id"))
        .or_else(|| body.pointer("/0/id"))
        .and_then(Value::as_u64)
}

#[async_trait]
impl TargetClient for BigCommerceClient {
    async fn create(&self, kind: EntityKind, payload: &Value) -> Result<CreatedRecord, WriteError> {
        let url = format!("{}/{}", self.base(), Self::path(kind, payload)?);
        let request = self.client.post(url).json(&Self::body(kind, payload));
        self.send(request, kind).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: u64,
        patch: &Value,
    ) -> Result<CreatedRecord, WriteError> {
        let path = Self::path(kind, patch)?;
        let request = if Self::is_batch_endpoint(kind) {
            let mut patch = patch.clone();
            if let Some(obj) = patch.as_object_mut() {
                obj.insert("id".to_string(), Value::from(id));
            }
            self.client
                .put(format!("{}/{}", self.base(), path))
                .json(&Value::Array(vec![patch]))
        } else {
            self.client
                .put(format!("{}/{}/{}", self.base(), path, id))
                .json(&Self::body(kind, patch))
        };
        self.send(request, kind).await
    }

    async fn find_existing(&self, kind: EntityKind, payload: &Value) -> Result<Option<u64>, WriteError> {
        let Some((path, query)) = Self::lookup(kind, payload) else {
            return Ok(None);
        };
        let request = self
            .client
            .get(format!("{}/{}", self.base(), path))
            .query(&query);
        let response = self.execute(request).await?;

        // v2 answers an empty search with 204
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            debug!("BigCommerce {} lookup returned {}: {}", kind, status, text);
            return Err(classify(status, &headers, &text));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| WriteError::Fatal(format!("unreadable response: {}", e)))?;
        Ok(extract_id(&body))
    }
}
