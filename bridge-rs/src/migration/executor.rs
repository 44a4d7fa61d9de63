//! Batch migration executor
//!
//! Runs one entity collection from the source store into the target store.
//! Items in the resume set are never sent to the target; every other item
//! ends up successful, skipped (duplicate) or failed, and a failure never
//! stops the run. Only a failed source fetch aborts.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transform::{parents_first, transform};
use super::types::{DependencyMappings, EntityKind, EntityRun, IdMapping, ItemOutcome, RunReport};
use crate::clients::{ListParams, SourceClient, SourceRecord, TargetClient, WriteError, DEFAULT_PAGE_SIZE};
use crate::error::{BridgeError, Result};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::throttle::TargetThrottle;

/// Message of the error event emitted on cancellation
pub const CANCELLED_MESSAGE: &str = "migration cancelled";

/// Executes entity runs against one source/target pair
pub struct BatchExecutor<'a> {
    source: &'a dyn SourceClient,
    target: &'a dyn TargetClient,
    throttle: &'a TargetThrottle,
    page_size: u32,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        source: &'a dyn SourceClient,
        target: &'a dyn TargetClient,
        throttle: &'a TargetThrottle,
    ) -> Self {
        Self {
            source,
            target,
            throttle,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch a whole collection, page by page
    pub async fn fetch_all(&self, kind: EntityKind, scope: Option<u64>) -> Result<Vec<SourceRecord>> {
        let mut params = ListParams::first(self.page_size);
        params.category = scope;
        let mut records = Vec::new();

        loop {
            let page = self.source.list(kind, &params).await?;
            let fetched = page.items.len();
            records.extend(page.items);

            let exhausted = match page.total_pages {
                Some(total) => params.page >= total,
                None => fetched < self.page_size as usize,
            };
            if fetched == 0 || exhausted {
                break;
            }
            params.page += 1;
        }

        debug!("Fetched {} {} in {} page(s)", records.len(), kind, params.page);
        Ok(records)
    }

    /// Run one entity migration.
    ///
    /// Emits `started`, one `progress` per item, then `complete`. On a fetch
    /// failure or a missing dependency mapping a single `error` event is
    /// emitted and the error returned. On cancellation the partial report is
    /// returned with `cancelled` set, after an `error` event.
    pub async fn run(
        &self,
        run: &EntityRun,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let records = self.fetch_for(run, sink).await?;
        Ok(self.process(run, records, sink, cancel).await)
    }

    /// Check the run's dependency mappings and fetch its source records.
    /// Failures are reported to the sink as a single `error` event.
    pub async fn fetch_for(&self, run: &EntityRun, sink: &dyn ProgressSink) -> Result<Vec<SourceRecord>> {
        let kind = run.kind;

        if let Some(dependency) = run.mappings.missing_for(kind) {
            let err = BridgeError::DependencyNotSatisfied {
                entity: kind,
                dependency,
            };
            warn!("{}", err);
            sink.emit(ProgressEvent::error(err.to_string()));
            return Err(err);
        }

        match self.fetch_all(kind, run.scope).await {
            Ok(records) => Ok(records),
            Err(e) => {
                let err = BridgeError::Fetch {
                    entity: kind,
                    message: e.to_string(),
                };
                warn!("{}", err);
                sink.emit(ProgressEvent::error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Write fetched records to the target
    pub async fn process(
        &self,
        run: &EntityRun,
        records: Vec<SourceRecord>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RunReport {
        let kind = run.kind;
        let total = records.len() as u64;
        let (resumed, mut pending): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| run.resume.contains(&r.id));
        if kind == EntityKind::Categories {
            parents_first(&mut pending);
        }

        info!(
            "Migrating {} {} ({} already migrated, batch size {})",
            pending.len(),
            kind,
            resumed.len(),
            run.batch_size
        );
        sink.emit(ProgressEvent::Started {
            entity: kind,
            total,
            already_migrated: resumed.len() as u64,
        });

        let mut report = RunReport::new(kind);
        for _ in &resumed {
            report.stats.record(&ItemOutcome::Resumed);
        }
        let mut completed = resumed.len() as u64;
        if completed > 0 {
            sink.emit(ProgressEvent::Progress {
                completed,
                total,
                current: None,
            });
        }

        // Categories created during this run become parents for later ones
        let mut mappings = run.mappings.clone();

        for (index, batch) in pending.chunks(run.batch_size.max(1)).enumerate() {
            if index > 0 {
                tokio::task::yield_now().await;
            }

            for record in batch {
                if cancel.is_cancelled() {
                    warn!("{} run cancelled after {} of {} items", kind, completed, total);
                    report.cancelled = true;
                    sink.emit(ProgressEvent::error(CANCELLED_MESSAGE));
                    return report;
                }

                let label = record.label();
                let outcome = self
                    .migrate_one(kind, record, &label, &mappings, &mut report.stats.warnings)
                    .await;

                match &outcome {
                    ItemOutcome::Migrated { target_id } => {
                        report.migrated_ids.push(record.id);
                        report.id_mapping.insert(record.id, *target_id);
                        if kind == EntityKind::Categories {
                            mappings.categories.insert(record.id, *target_id);
                        }
                    }
                    ItemOutcome::Duplicate {
                        existing_id: Some(existing_id),
                    } => {
                        report.migrated_ids.push(record.id);
                        report.id_mapping.insert(record.id, *existing_id);
                        if kind == EntityKind::Categories {
                            mappings.categories.insert(record.id, *existing_id);
                        }
                    }
                    // Left out of the resume set so a later run can learn the mapping
                    ItemOutcome::Duplicate { existing_id: None } if kind.is_referenced() => {
                        report.stats.warnings.push(format!(
                            "{}: already in the target but its target id is unknown",
                            label
                        ));
                    }
                    ItemOutcome::Duplicate { existing_id: None } => {
                        report.migrated_ids.push(record.id);
                    }
                    ItemOutcome::Failed { message } => {
                        report.stats.warnings.push(format!("{}: {}", label, message));
                    }
                    ItemOutcome::Resumed => {}
                }
                report.stats.record(&outcome);

                completed += 1;
                sink.emit(ProgressEvent::Progress {
                    completed,
                    total,
                    current: Some(label),
                });
            }
        }

        if kind == EntityKind::Categories && !report.id_mapping.is_empty() {
            self.relink_children(
                &resumed,
                &run.mappings,
                &report.id_mapping,
                &mut report.stats.warnings,
            )
            .await;
        }

        info!(
            "{} run finished: {} successful, {} skipped, {} failed",
            kind, report.stats.successful, report.stats.skipped, report.stats.failed
        );
        sink.emit(ProgressEvent::Complete {
            stats: report.stats.clone(),
            migrated_ids: report.migrated_ids.clone(),
            id_mapping: report.id_mapping.clone(),
        });

        report
    }

    /// Move categories from earlier runs under a parent that only got
    /// mapped in this run. They were created at the top level back then.
    async fn relink_children(
        &self,
        resumed: &[SourceRecord],
        known: &DependencyMappings,
        mapped_now: &IdMapping,
        warnings: &mut Vec<String>,
    ) {
        for record in resumed {
            let parent = record.body.get("parent").and_then(Value::as_u64).unwrap_or_default();
            let (Some(parent_id), Some(target_id)) =
                (mapped_now.get(parent), known.categories.get(record.id))
            else {
                continue;
            };

            let label = record.label();
            let patch = json!({ "parent_id": parent_id });
            match self
                .throttle
                .execute(&label, || self.target.update(EntityKind::Categories, target_id, &patch))
                .await
            {
                Ok(_) => info!("Moved category {} under target category {}", label, parent_id),
                Err(e) => warnings.push(format!("{}: cannot move under its parent: {}", label, e)),
            }
        }
    }

    /// Target ID of a duplicate the target did not name
    async fn find_existing(&self, kind: EntityKind, label: &str, payload: &Value) -> Option<u64> {
        match self
            .throttle
            .execute(label, || self.target.find_existing(kind, payload))
            .await
        {
            Ok(found) => found,
            Err(e) => {
                debug!("Cannot look up existing {} {}: {}", kind, label, e);
                None
            }
        }
    }

    async fn migrate_one(
        &self,
        kind: EntityKind,
        record: &SourceRecord,
        label: &str,
        mappings: &DependencyMappings,
        warnings: &mut Vec<String>,
    ) -> ItemOutcome {
        let transformed = match transform(kind, record, mappings) {
            Ok(transformed) => transformed,
            Err(e) => {
                debug!("Cannot transform {} {}: {}", kind, record.id, e);
                return ItemOutcome::Failed {
                    message: e.to_string(),
                };
            }
        };
        warnings.extend(transformed.warnings);
        let payload = transformed.payload;

        match self
            .throttle
            .execute(label, || self.target.create(kind, &payload))
            .await
        {
            Ok(created) => ItemOutcome::Migrated {
                target_id: created.id,
            },
            Err(WriteError::Duplicate {
                existing_id,
                message,
            }) => {
                debug!("{} {} already exists: {}", kind, label, message);
                let existing_id = match existing_id {
                    Some(id) => Some(id),
                    None => self.find_existing(kind, label, &payload).await,
                };
                ItemOutcome::Duplicate { existing_id }
            }
            Err(e) => ItemOutcome::Failed {
                message: e.to_string(),
            },
        }
    }
}
