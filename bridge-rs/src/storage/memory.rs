//! In-memory wizard store, used by tests and dry runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{decode_state, storage_key, WizardStore, DEFAULT_NAMESPACE};
use crate::error::Result;
use crate::wizard::WizardState;

/// Wizard store backed by a map of serialized documents
#[derive(Clone)]
pub struct MemoryWizardStore {
    namespace: String,
    documents: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryWizardStore {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a raw document, bypassing serialization
    pub async fn put_raw(&self, source_key: &str, target_key: &str, raw: &str) {
        let key = storage_key(&self.namespace, source_key, target_key);
        self.documents.write().await.insert(key, raw.to_string());
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

impl Default for MemoryWizardStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WizardStore for MemoryWizardStore {
    async fn save(&self, state: &WizardState) -> Result<()> {
        let key = storage_key(&self.namespace, &state.source_key, &state.target_key);
        let raw = serde_json::to_string(state)?;
        self.documents.write().await.insert(key, raw);
        Ok(())
    }

    async fn load(&self, source_key: &str, target_key: &str) -> Result<Option<WizardState>> {
        let key = storage_key(&self.namespace, source_key, target_key);
        let documents = self.documents.read().await;
        Ok(documents
            .get(&key)
            .and_then(|raw| decode_state(&key, raw, source_key, target_key)))
    }

    async fn clear(&self, source_key: &str, target_key: &str) -> Result<()> {
        let key = storage_key(&self.namespace, source_key, target_key);
        self.documents.write().await.remove(&key);
        Ok(())
    }
}
