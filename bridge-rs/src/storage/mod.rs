//! Wizard persistence
//!
//! Wizard state is stored as one JSON document per store pair under the key
//! `<namespace>-<source>-<target>`. Unreadable documents, and documents that
//! belong to another pair, load as absent.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, StorageBackend};
use crate::error::Result;
use crate::wizard::WizardState;

pub use memory::MemoryWizardStore;
pub use sqlite::SqliteWizardStore;

/// Default key namespace
pub const DEFAULT_NAMESPACE: &str = "bc-migration-wizard";

/// Build the persistence key for a store pair.
///
/// `%` and `-` inside the store IDs are percent-encoded, so two different
/// pairs never share a key.
pub fn storage_key(namespace: &str, source_key: &str, target_key: &str) -> String {
    format!(
        "{}-{}-{}",
        namespace,
        escape_component(source_key),
        escape_component(target_key)
    )
}

fn escape_component(id: &str) -> String {
    id.replace('%', "%25").replace('-', "%2D")
}

/// Durable key-value storage for wizard state
#[async_trait]
pub trait WizardStore: Send + Sync {
    /// Overwrite the stored state for the state's store pair
    async fn save(&self, state: &WizardState) -> Result<()>;

    /// Stored state, or `None` when absent or unreadable
    async fn load(&self, source_key: &str, target_key: &str) -> Result<Option<WizardState>>;

    /// Remove the stored state for a store pair
    async fn clear(&self, source_key: &str, target_key: &str) -> Result<()>;
}

/// Open the store selected by the configuration
pub async fn open_store(config: &Config) -> Result<Arc<dyn WizardStore>> {
    let namespace = &config.migration.namespace;
    match config.storage.backend {
        StorageBackend::Sqlite => {
            info!("Using SQLite wizard store at {}", config.storage.database_url);
            let store = SqliteWizardStore::connect(&config.storage.database_url, namespace).await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory wizard store; progress is lost on exit");
            Ok(Arc::new(MemoryWizardStore::with_namespace(namespace.clone())))
        }
    }
}

/// Parse a stored document for a pair, treating corruption and documents
/// of other pairs as absence
pub(crate) fn decode_state(
    key: &str,
    raw: &str,
    source_key: &str,
    target_key: &str,
) -> Option<WizardState> {
    match serde_json::from_str::<WizardState>(raw) {
        Ok(state) if state.source_key == source_key && state.target_key == target_key => Some(state),
        Ok(state) => {
            warn!(
                "Ignoring wizard state under {}: it belongs to {} -> {}",
                key, state.source_key, state.target_key
            );
            None
        }
        Err(e) => {
            warn!("Ignoring unreadable wizard state under {}: {}", key, e);
            None
        }
    }
}
