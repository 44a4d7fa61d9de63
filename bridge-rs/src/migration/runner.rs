//! Phase runner: ties executor runs to the wizard state
//!
//! A run claims its entity for the store pair, reads its resume set and
//! dependency mappings from the wizard state, executes, then checkpoints the
//! report back into the phase data. The session lock is only held while
//! reading and checkpointing, never across the run itself; the claim keeps a
//! second run of the same entity out until the first one is checkpointed.

use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::executor::BatchExecutor;
use super::types::{DependencyMappings, EntityKind, EntityProgress, EntityRun, RunReport};
use crate::error::{BridgeError, Result};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::wizard::{
    ContentData, CoreDataData, FoundationData, PhaseData, PhaseStatus, RunClaim, TransactionsData,
    WizardSession, WizardState,
};

/// Caller-supplied options for one entity run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Category scope (products only)
    pub scope: Option<u64>,
    /// Extra source IDs to treat as migrated
    pub resume: Vec<u64>,
    /// Explicit mappings; empty slots are filled from the wizard state
    pub mappings: DependencyMappings,
    pub batch_size: Option<usize>,
}

/// Forwards events, holding `complete` back until the run is checkpointed
struct DeferredComplete<'a> {
    inner: &'a dyn ProgressSink,
    held: std::sync::Mutex<Option<ProgressEvent>>,
}

impl<'a> DeferredComplete<'a> {
    fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            held: std::sync::Mutex::new(None),
        }
    }

    fn release(&self) {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(event) = held {
            self.inner.emit(event);
        }
    }
}

impl ProgressSink for DeferredComplete<'_> {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Complete { .. } => {
                *self.held.lock().unwrap_or_else(|e| e.into_inner()) = Some(event);
            }
            other => self.inner.emit(other),
        }
    }
}

fn report_failure(sink: &dyn ProgressSink, kind: EntityKind, err: BridgeError) -> BridgeError {
    warn!("{} run failed: {}", kind, err);
    sink.emit(ProgressEvent::error(err.to_string()));
    err
}

/// Runs entity migrations on behalf of a wizard session
pub struct PhaseRunner<'a> {
    executor: BatchExecutor<'a>,
    default_batch_size: usize,
}

impl<'a> PhaseRunner<'a> {
    pub fn new(executor: BatchExecutor<'a>, default_batch_size: usize) -> Self {
        Self {
            executor,
            default_batch_size: default_batch_size.max(1),
        }
    }

    /// Migrate one entity and checkpoint the result into its phase.
    ///
    /// Refused with [`BridgeError::RunInProgress`] while another run of the
    /// same entity is active on the session.
    pub async fn run(
        &self,
        session: &Mutex<WizardSession>,
        kind: EntityKind,
        request: &RunRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let claim = session
            .lock()
            .await
            .claim_run(kind)
            .map_err(|e| report_failure(sink, kind, e))?;
        self.run_claimed(session, claim, request, sink, cancel).await
    }

    /// Like [`PhaseRunner::run`], for a caller that already holds the claim
    pub async fn run_claimed(
        &self,
        session: &Mutex<WizardSession>,
        claim: RunClaim,
        request: &RunRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let kind = claim.kind();
        let phase = kind.phase();

        let run = {
            let mut session = session.lock().await;
            self.prepare(&mut session, kind, request)
                .await
                .map_err(|e| report_failure(sink, kind, e))?
        };

        let records = self.executor.fetch_for(&run, sink).await?;

        {
            let mut session = session.lock().await;
            if session.status(phase) == PhaseStatus::Pending {
                session
                    .start_phase(phase)
                    .await
                    .map_err(|e| report_failure(sink, kind, e))?;
            }
        }

        let deferred = DeferredComplete::new(sink);
        let report = self.executor.process(&run, records, &deferred, cancel).await;

        let mut session = session.lock().await;
        let data = checkpoint_data(session.state(), &report, run.scope);
        match session.update_phase_data(phase, data).await {
            Ok(outcome) if outcome.is_applied() => info!(
                "Checkpointed {} run: {} ids migrated, {} mapped",
                kind,
                report.migrated_ids.len(),
                report.id_mapping.len()
            ),
            Ok(outcome) => warn!("Could not checkpoint {} run: {:?}", kind, outcome),
            Err(e) => {
                warn!("Could not save {} run: {}", kind, e);
                // A cancelled run already ended its stream with an error
                if !report.cancelled {
                    sink.emit(ProgressEvent::error(format!("could not save progress: {}", e)));
                }
                return Err(e);
            }
        }
        deferred.release();

        Ok(report)
    }

    async fn prepare(
        &self,
        session: &mut WizardSession,
        kind: EntityKind,
        request: &RunRequest,
    ) -> Result<EntityRun> {
        session.refresh().await?;

        let phase = kind.phase();
        let status = session.status(phase);
        if !session.is_phase_available(phase)
            || matches!(status, PhaseStatus::Locked | PhaseStatus::Skipped)
        {
            warn!("Refusing {} run: phase {} is {}", kind, phase, status);
            return Err(BridgeError::PhaseUnavailable(phase));
        }

        let state = session.state();
        let mut resume: BTreeSet<u64> = state.progress(kind).migrated_ids;
        resume.extend(request.resume.iter().copied());

        let mappings = request.mappings.clone().or_from(&stored_mappings(state));

        Ok(EntityRun::new(kind)
            .with_scope(request.scope)
            .with_resume(resume)
            .with_mappings(mappings)
            .with_batch_size(request.batch_size.unwrap_or(self.default_batch_size)))
    }
}

/// Dependency mappings recorded in the wizard state
pub fn stored_mappings(state: &WizardState) -> DependencyMappings {
    DependencyMappings {
        categories: state.id_mapping(EntityKind::Categories),
        products: state.id_mapping(EntityKind::Products),
        customers: state.id_mapping(EntityKind::Customers),
    }
}

/// Partial phase payload recording one run
pub fn checkpoint_data(state: &WizardState, report: &RunReport, scope: Option<u64>) -> PhaseData {
    let progress = EntityProgress::from_report(report);
    let stats = &report.stats;

    match report.entity {
        EntityKind::Categories => {
            let previous = state.payload::<FoundationData>().cloned().unwrap_or_default();
            PhaseData::Foundation(FoundationData {
                categories_created: previous.categories_created + stats.successful,
                categories_skipped: previous.categories_skipped + (stats.skipped - stats.resumed),
                categories_errored: stats.failed,
                category_id_mapping: progress.id_mapping,
                migrated_category_ids: progress.migrated_ids,
                last_run: progress.stats,
            })
        }
        EntityKind::Products => {
            let mut data = CoreDataData {
                products: progress,
                ..Default::default()
            };
            if let Some(category) = scope {
                if !report.cancelled && stats.failed == 0 {
                    data.completed_categories.insert(category);
                }
            }
            PhaseData::CoreData(data)
        }
        EntityKind::Customers => PhaseData::CoreData(CoreDataData {
            customers: progress,
            ..Default::default()
        }),
        EntityKind::Orders => PhaseData::Transactions(TransactionsData {
            orders: progress,
            ..Default::default()
        }),
        EntityKind::Coupons => PhaseData::Transactions(TransactionsData {
            coupons: progress,
            ..Default::default()
        }),
        EntityKind::Reviews => PhaseData::Content(ContentData {
            reviews: progress,
            ..Default::default()
        }),
        EntityKind::Pages => PhaseData::Content(ContentData {
            pages: progress,
            ..Default::default()
        }),
        EntityKind::Posts => PhaseData::Content(ContentData {
            posts: progress,
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MemorySource, MemoryTarget, SourceRecord};
    use crate::config::ThrottleConfig;
    use crate::progress::{RecordingSink, StreamSummary};
    use crate::storage::{MemoryWizardStore, WizardStore};
    use crate::throttle::TargetThrottle;
    use crate::wizard::Phase;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn categories() -> Vec<SourceRecord> {
        (1..=3)
            .map(|id| SourceRecord::new(id, json!({"id": id, "name": format!("Cat {}", id)})))
            .collect()
    }

    fn customers() -> Vec<SourceRecord> {
        (1..=4)
            .map(|id| {
                SourceRecord::new(
                    id,
                    json!({"id": id, "email": format!("c{}@example.com", id), "first_name": "C"}),
                )
            })
            .collect()
    }

    /// Store whose saves fail once `saves_left` runs out
    struct FailingSaves {
        inner: MemoryWizardStore,
        saves_left: AtomicUsize,
    }

    #[async_trait]
    impl WizardStore for FailingSaves {
        async fn save(&self, state: &WizardState) -> Result<()> {
            let allowed = self
                .saves_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(BridgeError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(state).await
        }

        async fn load(&self, source_key: &str, target_key: &str) -> Result<Option<WizardState>> {
            self.inner.load(source_key, target_key).await
        }

        async fn clear(&self, source_key: &str, target_key: &str) -> Result<()> {
            self.inner.clear(source_key, target_key).await
        }
    }

    async fn session() -> Mutex<WizardSession> {
        let store = Arc::new(MemoryWizardStore::new());
        Mutex::new(WizardSession::open(store, "shop", "hash").await.unwrap())
    }

    #[tokio::test]
    async fn test_run_checkpoints_into_phase_data() {
        let source = MemorySource::new().with_records(EntityKind::Categories, categories());
        let target = MemoryTarget::new();
        let throttle = TargetThrottle::new(&ThrottleConfig::default());
        let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 50);
        let session = session().await;

        let report = runner
            .run(
                &session,
                EntityKind::Categories,
                &RunRequest::default(),
                &RecordingSink::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.stats.successful, 3);

        let session = session.lock().await;
        assert_eq!(session.status(Phase::Foundation), PhaseStatus::InProgress);
        let data = session.state().payload::<FoundationData>().unwrap();
        assert_eq!(data.categories_created, 3);
        assert_eq!(data.category_id_mapping.len(), 3);
        assert_eq!(data.migrated_category_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_second_run_resumes_from_state() {
        let source = MemorySource::new().with_records(EntityKind::Categories, categories());
        let target = MemoryTarget::new();
        let throttle = TargetThrottle::new(&ThrottleConfig::default());
        let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 50);
        let session = session().await;
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            runner
                .run(
                    &session,
                    EntityKind::Categories,
                    &RunRequest::default(),
                    &RecordingSink::new(),
                    &cancel,
                )
                .await
                .unwrap();
        }

        assert_eq!(target.create_calls(), 3);
        let session = session.lock().await;
        let data = session.state().payload::<FoundationData>().unwrap();
        assert_eq!(data.categories_created, 3);
        assert_eq!(data.last_run.as_ref().unwrap().resumed, 3);
    }

    #[tokio::test]
    async fn test_products_need_foundation() {
        let source = MemorySource::new();
        let target = MemoryTarget::new();
        let throttle = TargetThrottle::new(&ThrottleConfig::default());
        let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 50);
        let session = session().await;
        let sink = RecordingSink::new();

        let result = runner
            .run(
                &session,
                EntityKind::Products,
                &RunRequest::default(),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(BridgeError::PhaseUnavailable(Phase::CoreData))
        ));
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_runs_submit_each_item_once() {
        let source = MemorySource::new().with_records(EntityKind::Customers, customers());
        let target = MemoryTarget::new();
        let throttle = TargetThrottle::new(&ThrottleConfig::default());
        let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 1);
        let session = session().await;
        session
            .lock()
            .await
            .complete_phase(Phase::Foundation, None)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let request = RunRequest::default();
        let (first_sink, second_sink) = (RecordingSink::new(), RecordingSink::new());

        let (first, second) = tokio::join!(
            runner.run(&session, EntityKind::Customers, &request, &first_sink, &cancel),
            runner.run(&session, EntityKind::Customers, &request, &second_sink, &cancel),
        );

        assert_eq!(target.create_calls(), 4);
        let mut successful = 0;
        for result in [&first, &second] {
            match result {
                Ok(report) => successful += report.stats.successful,
                Err(BridgeError::RunInProgress(EntityKind::Customers)) => {}
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        assert_eq!(successful, 4);
    }

    #[tokio::test]
    async fn test_run_refused_while_entity_is_claimed() {
        let source = MemorySource::new().with_records(EntityKind::Categories, categories());
        let target = MemoryTarget::new();
        let throttle = TargetThrottle::new(&ThrottleConfig::default());
        let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 50);
        let session = session().await;
        let claim = session.lock().await.claim_run(EntityKind::Categories).unwrap();
        let sink = RecordingSink::new();

        let result = runner
            .run(
                &session,
                EntityKind::Categories,
                &RunRequest::default(),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(BridgeError::RunInProgress(EntityKind::Categories))
        ));
        assert_eq!(sink.events().len(), 1);
        assert_eq!(source.list_calls(), 0);
        assert_eq!(target.create_calls(), 0);

        let report = runner
            .run_claimed(
                &session,
                claim,
                &RunRequest::default(),
                &RecordingSink::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.stats.successful, 3);
        assert!(session.lock().await.claim_run(EntityKind::Categories).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_phase_pending() {
        let source = MemorySource::new().with_records(EntityKind::Categories, categories());
        source.set_unreachable(true);
        let target = MemoryTarget::new();
        let throttle = TargetThrottle::new(&ThrottleConfig::default());
        let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 50);
        let store = Arc::new(MemoryWizardStore::new());
        let session = Mutex::new(WizardSession::open(store.clone(), "shop", "hash").await.unwrap());
        let sink = RecordingSink::new();

        let result = runner
            .run(
                &session,
                EntityKind::Categories,
                &RunRequest::default(),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(BridgeError::Fetch { .. })));
        assert_eq!(sink.events().len(), 1);
        assert_eq!(
            session.lock().await.status(Phase::Foundation),
            PhaseStatus::Pending
        );
        let stored = store.load("shop", "hash").await.unwrap().unwrap();
        assert_eq!(stored.status(Phase::Foundation), PhaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_checkpoint_ends_stream_with_error() {
        let source = MemorySource::new().with_records(EntityKind::Categories, categories());
        let target = MemoryTarget::new();
        let throttle = TargetThrottle::new(&ThrottleConfig::default());
        let runner = PhaseRunner::new(BatchExecutor::new(&source, &target, &throttle), 50);
        // Opening the session and starting the phase save, the checkpoint does not
        let store = Arc::new(FailingSaves {
            inner: MemoryWizardStore::new(),
            saves_left: AtomicUsize::new(2),
        });
        let session = Mutex::new(WizardSession::open(store, "shop", "hash").await.unwrap());
        let sink = RecordingSink::new();

        let result = runner
            .run(
                &session,
                EntityKind::Categories,
                &RunRequest::default(),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(BridgeError::Io(_))));
        let events = sink.events();
        assert!(!events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Complete { .. })));
        match StreamSummary::from_events(&events) {
            StreamSummary::Failed { message } => assert!(message.contains("disk full"), "{}", message),
            other => panic!("unexpected summary {:?}", other),
        }
    }

    #[test]
    fn test_scoped_product_run_marks_category_complete() {
        let state = WizardState::new("shop", "hash");
        let mut report = RunReport::new(EntityKind::Products);
        report.migrated_ids = vec![1, 2];

        match checkpoint_data(&state, &report, Some(15)) {
            PhaseData::CoreData(data) => {
                assert!(data.completed_categories.contains(&15));
                assert_eq!(data.products.migrated_ids.len(), 2);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        report.stats.failed = 1;
        match checkpoint_data(&state, &report, Some(15)) {
            PhaseData::CoreData(data) => assert!(data.completed_categories.is_empty()),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
