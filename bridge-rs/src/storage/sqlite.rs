//! SQLite-backed wizard store

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::{decode_state, storage_key, WizardStore, DEFAULT_NAMESPACE};
use crate::error::Result;
use crate::wizard::WizardState;

/// Wizard store persisting one row per store pair
pub struct SqliteWizardStore {
    db: SqlitePool,
    namespace: String,
}

impl SqliteWizardStore {
    /// Create a new store on an existing pool
    pub fn new(db: SqlitePool) -> Self {
        Self::with_namespace(db, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(db: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }

    /// Connect to `database_url` and create the schema
    pub async fn connect(database_url: &str, namespace: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;
        let store = Self::with_namespace(db, namespace);
        store.init_db().await?;
        Ok(store)
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wizard_state (
                key TEXT PRIMARY KEY,
                source_key TEXT NOT NULL,
                target_key TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Store a raw document, bypassing serialization
    pub async fn put_raw(&self, source_key: &str, target_key: &str, raw: &str) -> Result<()> {
        let key = storage_key(&self.namespace, source_key, target_key);
        self.upsert(&key, source_key, target_key, raw).await
    }

    async fn upsert(&self, key: &str, source_key: &str, target_key: &str, raw: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wizard_state (key, source_key, target_key, state_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(source_key)
        .bind(target_key)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WizardStore for SqliteWizardStore {
    async fn save(&self, state: &WizardState) -> Result<()> {
        let key = storage_key(&self.namespace, &state.source_key, &state.target_key);
        let raw = serde_json::to_string(state)?;
        debug!("Saving wizard state {}", key);
        self.upsert(&key, &state.source_key, &state.target_key, &raw)
            .await
    }

    async fn load(&self, source_key: &str, target_key: &str) -> Result<Option<WizardState>> {
        let key = storage_key(&self.namespace, source_key, target_key);

        let row = sqlx::query_as::<_, (String,)>(
            "SELECT state_json FROM wizard_state WHERE key = ? AND source_key = ? AND target_key = ?",
        )
        .bind(&key)
        .bind(source_key)
        .bind(target_key)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.and_then(|(raw,)| decode_state(&key, &raw, source_key, target_key)))
    }

    async fn clear(&self, source_key: &str, target_key: &str) -> Result<()> {
        let key = storage_key(&self.namespace, source_key, target_key);

        sqlx::query("DELETE FROM wizard_state WHERE key = ?")
            .bind(&key)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}
