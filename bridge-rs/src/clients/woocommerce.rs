//! WooCommerce REST v3 / WordPress REST v2 source client

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ListParams, Page, SourceClient, SourceCredentials, SourceRecord};
use crate::error::{BridgeError, Result};
use crate::migration::EntityKind;

/// Read-only client for a WooCommerce store and its WordPress site
pub struct WooCommerceClient {
    credentials: SourceCredentials,
    client: reqwest::Client,
}

impl WooCommerceClient {
    pub fn new(credentials: SourceCredentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
        }
    }

    /// Endpoint path for an entity collection
    pub fn endpoint(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Categories => "wp-json/wc/v3/products/categories",
            EntityKind::Products => "wp-json/wc/v3/products",
            EntityKind::Customers => "wp-json/wc/v3/customers",
            EntityKind::Orders => "wp-json/wc/v3/orders",
            EntityKind::Coupons => "wp-json/wc/v3/coupons",
            EntityKind::Reviews => "wp-json/wc/v3/products/reviews",
            EntityKind::Pages => "wp-json/wp/v2/pages",
            EntityKind::Posts => "wp-json/wp/v2/posts",
        }
    }

    fn url(&self, kind: EntityKind) -> String {
        format!(
            "{}/{}",
            self.credentials.url.trim_end_matches('/'),
            Self::endpoint(kind)
        )
    }

    fn is_wordpress(kind: EntityKind) -> bool {
        matches!(kind, EntityKind::Pages | EntityKind::Posts)
    }
}

fn total_pages(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("x-wp-totalpages")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl SourceClient for WooCommerceClient {
    async fn list(&self, kind: EntityKind, params: &ListParams) -> Result<Page> {
        let mut query = vec![
            ("page", params.page.to_string()),
            ("per_page", params.per_page.to_string()),
        ];
        if let Some(category) = params.category {
            query.push(("category", category.to_string()));
        }
        if kind == EntityKind::Customers {
            // Default role filter hides guest-converted accounts
            query.push(("role", "all".to_string()));
        }

        let request = self.client.get(self.url(kind)).query(&query);
        let request = if Self::is_wordpress(kind) {
            match (&self.credentials.wp_username, &self.credentials.wp_app_password) {
                (Some(user), Some(password)) => request.basic_auth(user, Some(password)),
                _ => request,
            }
        } else {
            request.basic_auth(
                &self.credentials.consumer_key,
                Some(&self.credentials.consumer_secret),
            )
        };

        debug!("Fetching {} page {} from {}", kind, params.page, self.credentials.url);

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Client(format!("{} request failed: {}", kind, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("WooCommerce returned {} for {}: {}", status, kind, body);
            return Err(BridgeError::Client(format!(
                "WooCommerce returned {} for {}",
                status, kind
            )));
        }

        let total_pages = total_pages(response.headers());
        let body: Vec<Value> = response
            .json()
            .await
            .map_err(|e| BridgeError::Client(format!("invalid {} listing: {}", kind, e)))?;

        let items = body
            .into_iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(Value::as_u64)?;
                Some(SourceRecord::new(id, item))
            })
            .collect();

        Ok(Page { items, total_pages })
    }
}
