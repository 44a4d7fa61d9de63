//! In-memory stores for tests and dry runs

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{CreatedRecord, ListParams, Page, SourceClient, SourceRecord, TargetClient, WriteError};
use crate::error::{BridgeError, Result};
use crate::migration::EntityKind;

/// Source store holding fixed collections
#[derive(Default)]
pub struct MemorySource {
    collections: HashMap<EntityKind, Vec<SourceRecord>>,
    unreachable: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, kind: EntityKind, records: Vec<SourceRecord>) -> Self {
        self.collections.entry(kind).or_default().extend(records);
        self
    }

    /// Make every listing fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

fn in_category(record: &SourceRecord, category: u64) -> bool {
    record
        .body
        .get("categories")
        .and_then(Value::as_array)
        .map(|cats| {
            cats.iter()
                .any(|c| c.get("id").and_then(Value::as_u64) == Some(category))
        })
        .unwrap_or(false)
}

#[async_trait]
impl SourceClient for MemorySource {
    async fn list(&self, kind: EntityKind, params: &ListParams) -> Result<Page> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BridgeError::Client("source store unreachable".to_string()));
        }

        let all: Vec<&SourceRecord> = self
            .collections
            .get(&kind)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| params.category.map_or(true, |c| in_category(r, c)))
                    .collect()
            })
            .unwrap_or_default();

        let per_page = params.per_page.max(1) as usize;
        let total_pages = all.len().div_ceil(per_page) as u32;
        let start = (params.page.saturating_sub(1) as usize) * per_page;
        let items = all
            .into_iter()
            .skip(start)
            .take(per_page)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total_pages: Some(total_pages),
        })
    }
}

/// A stored target record
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: u64,
    pub body: Value,
}

/// Target store that keeps records in memory and detects duplicates by
/// natural key
pub struct MemoryTarget {
    records: Mutex<HashMap<EntityKind, Vec<StoredRecord>>>,
    /// Scripted failures keyed by (entity, natural key value)
    failures: Mutex<HashMap<(EntityKind, String), VecDeque<WriteError>>>,
    next_id: AtomicU64,
    create_calls: AtomicUsize,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1000),
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Seed a record as if it already existed in the target
    pub fn seed(&self, kind: EntityKind, body: Value) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut records) = self.records.lock() {
            records.entry(kind).or_default().push(StoredRecord { id, body });
        }
        id
    }

    /// Fail the next `times` writes whose natural key equals `key`
    /// (compared case-insensitively)
    pub fn fail_next(&self, kind: EntityKind, key: &str, times: usize, error: WriteError) {
        if let Ok(mut failures) = self.failures.lock() {
            let queue = failures.entry((kind, key.to_ascii_lowercase())).or_default();
            queue.extend(std::iter::repeat(error).take(times));
        }
    }

    pub fn records(&self, kind: EntityKind) -> Vec<StoredRecord> {
        self.records
            .lock()
            .map(|r| r.get(&kind).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Every create attempt, including failed ones
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn key_of(kind: EntityKind, payload: &Value) -> Option<String> {
        let field = kind.natural_key()?;
        match payload.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.to_ascii_lowercase()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetClient for MemoryTarget {
    async fn create(
        &self,
        kind: EntityKind,
        payload: &Value,
    ) -> std::result::Result<CreatedRecord, WriteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let key = Self::key_of(kind, payload);

        if let Some(key) = &key {
            let scripted = match self.failures.lock() {
                Ok(mut failures) => failures
                    .get_mut(&(kind, key.clone()))
                    .and_then(VecDeque::pop_front),
                Err(_) => None,
            };
            if let Some(error) = scripted {
                return Err(error);
            }
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| WriteError::Transient("target store poisoned".to_string()))?;
        let existing = records.entry(kind).or_default();

        if let Some(key) = &key {
            if let Some(found) = existing
                .iter()
                .find(|r| Self::key_of(kind, &r.body).as_ref() == Some(key))
            {
                return Err(WriteError::Duplicate {
                    existing_id: Some(found.id),
                    message: format!("{} '{}' already exists", kind, key),
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        existing.push(StoredRecord {
            id,
            body: payload.clone(),
        });
        Ok(CreatedRecord { id })
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: u64,
        patch: &Value,
    ) -> std::result::Result<CreatedRecord, WriteError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| WriteError::Transient("target store poisoned".to_string()))?;
        let record = records
            .get_mut(&kind)
            .and_then(|r| r.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| WriteError::Fatal(format!("{} {} not found", kind, id)))?;

        if let (Some(body), Some(patch)) = (record.body.as_object_mut(), patch.as_object()) {
            for (k, v) in patch {
                body.insert(k.clone(), v.clone());
            }
        }
        Ok(CreatedRecord { id })
    }

    async fn find_existing(
        &self,
        kind: EntityKind,
        payload: &Value,
    ) -> std::result::Result<Option<u64>, WriteError> {
        let Some(key) = Self::key_of(kind, payload) else {
            return Ok(None);
        };
        let records = self
            .records
            .lock()
            .map_err(|_| WriteError::Transient("target store poisoned".to_string()))?;
        Ok(records.get(&kind).and_then(|records| {
            records
                .iter()
                .find(|r| Self::key_of(kind, &r.body).as_ref() == Some(&key))
                .map(|r| r.id)
        }))
    }
}
