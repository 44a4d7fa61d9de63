//! Source and target store clients
//!
//! The orchestrator only depends on [`SourceClient`] and [`TargetClient`].
//! The REST implementations are thin wrappers; the in-memory ones back the
//! tests and dry runs.

pub mod bigcommerce;
pub mod memory;
pub mod woocommerce;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::Result;
use crate::migration::EntityKind;

pub use bigcommerce::BigCommerceClient;
pub use memory::{MemorySource, MemoryTarget};
pub use woocommerce::WooCommerceClient;

/// Items requested per source page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One record from the source store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: u64,
    /// Raw source representation
    pub body: serde_json::Value,
}

impl SourceRecord {
    pub fn new(id: u64, body: serde_json::Value) -> Self {
        Self { id, body }
    }

    /// Human-readable name for progress display
    pub fn label(&self) -> String {
        let body = &self.body;
        ["name", "email", "code", "number", "sku"]
            .iter()
            .find_map(|field| body.get(*field).and_then(|v| v.as_str()))
            .or_else(|| body.pointer("/title/rendered").and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", self.id))
    }
}

/// Listing parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
    /// Restrict to one category (products only)
    pub category: Option<u64>,
}

impl ListParams {
    pub fn first(per_page: u32) -> Self {
        Self {
            page: 1,
            per_page,
            category: None,
        }
    }
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<SourceRecord>,
    /// Total pages reported by the source, when known
    pub total_pages: Option<u32>,
}

/// Record created (or found) in the target store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub id: u64,
}

/// Why a target write failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    /// An item with the same natural key already exists
    #[error("duplicate: {message}")]
    Duplicate {
        existing_id: Option<u64>,
        message: String,
    },

    /// Target throttled the request
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Worth retrying (5xx, network)
    #[error("transient error: {0}")]
    Transient(String),

    /// Payload rejected; retrying will not help
    #[error("{0}")]
    Fatal(String),
}

impl WriteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WriteError::RateLimited { .. } | WriteError::Transient(_))
    }
}

/// Read side: the store being migrated from
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page of an entity collection
    async fn list(&self, kind: EntityKind, params: &ListParams) -> Result<Page>;
}

/// Write side: the store being migrated to
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Create one item
    async fn create(
        &self,
        kind: EntityKind,
        payload: &serde_json::Value,
    ) -> std::result::Result<CreatedRecord, WriteError>;

    /// Patch an existing item
    async fn update(
        &self,
        kind: EntityKind,
        id: u64,
        patch: &serde_json::Value,
    ) -> std::result::Result<CreatedRecord, WriteError>;

    /// ID of the item sharing the payload's natural key, for duplicates
    /// reported without one. Targets that cannot search return `None`.
    async fn find_existing(
        &self,
        _kind: EntityKind,
        _payload: &serde_json::Value,
    ) -> std::result::Result<Option<u64>, WriteError> {
        Ok(None)
    }
}

/// WooCommerce / WordPress credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCredentials {
    /// Site URL, e.g. `https://shop.example.com`
    pub url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// WordPress application password user, for pages and posts
    #[serde(default)]
    pub wp_username: Option<String>,
    #[serde(default)]
    pub wp_app_password: Option<String>,
}

/// BigCommerce credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetCredentials {
    pub store_hash: String,
    pub access_token: String,
    /// Override for tests and sandboxes
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Builds clients for the credentials of a request
pub trait ClientFactory: Send + Sync {
    fn source(&self, credentials: &SourceCredentials) -> Arc<dyn SourceClient>;

    fn target(&self, credentials: &TargetCredentials) -> Arc<dyn TargetClient>;
}

/// WooCommerce and BigCommerce REST clients
pub struct RestClientFactory;

impl ClientFactory for RestClientFactory {
    fn source(&self, credentials: &SourceCredentials) -> Arc<dyn SourceClient> {
        Arc::new(WooCommerceClient::new(credentials.clone()))
    }

    fn target(&self, credentials: &TargetCredentials) -> Arc<dyn TargetClient> {
        Arc::new(BigCommerceClient::new(credentials.clone()))
    }
}

/// Hands out the same pair of clients whatever the credentials
pub struct FixedClients {
    pub source: Arc<dyn SourceClient>,
    pub target: Arc<dyn TargetClient>,
}

impl ClientFactory for FixedClients {
    fn source(&self, _credentials: &SourceCredentials) -> Arc<dyn SourceClient> {
        self.source.clone()
    }

    fn target(&self, _credentials: &TargetCredentials) -> Arc<dyn TargetClient> {
        self.target.clone()
    }
}
