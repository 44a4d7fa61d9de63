//! Wizard session: applies transitions and auto-saves every accepted one

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::machine::{transition, Transition, WizardAction};
use super::types::{Phase, PhaseData, PhasePayload, PhaseStatus, WizardState};
use crate::error::{BridgeError, Result};
use crate::migration::EntityKind;
use crate::storage::WizardStore;

type ActiveRuns = Arc<std::sync::Mutex<HashSet<EntityKind>>>;

/// What happened to a requested action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied,
    Rejected { reason: String },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Exclusive right to run one entity for a store pair; released on drop
#[derive(Debug)]
pub struct RunClaim {
    kind: EntityKind,
    active: ActiveRuns,
}

impl RunClaim {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.kind);
    }
}

/// Wizard state for one store pair plus its backing store
pub struct WizardSession {
    store: Arc<dyn WizardStore>,
    state: WizardState,
    active_runs: ActiveRuns,
}

impl WizardSession {
    /// Load the stored state for a pair, creating (and saving) a fresh one
    /// when nothing usable is stored
    pub async fn open(
        store: Arc<dyn WizardStore>,
        source_key: &str,
        target_key: &str,
    ) -> Result<Self> {
        let state = match store.load(source_key, target_key).await? {
            Some(state) => {
                debug!("Resuming wizard for {} -> {}", source_key, target_key);
                state
            }
            None => {
                info!("Starting new wizard for {} -> {}", source_key, target_key);
                let mut state = WizardState::new(source_key, target_key);
                state.updated_at = Some(Utc::now());
                store.save(&state).await?;
                state
            }
        };

        Ok(Self {
            store,
            state,
            active_runs: ActiveRuns::default(),
        })
    }

    /// Pick up state written by another session or process
    pub async fn refresh(&mut self) -> Result<()> {
        let stored = self
            .store
            .load(&self.state.source_key, &self.state.target_key)
            .await?;
        if let Some(stored) = stored {
            if stored != self.state {
                debug!(
                    "Reloaded wizard state for {} -> {}",
                    self.state.source_key, self.state.target_key
                );
                self.state = stored;
            }
        }
        Ok(())
    }

    /// Claim an entity run; refused while another run of it is active
    pub fn claim_run(&self, kind: EntityKind) -> Result<RunClaim> {
        let mut active = self.active_runs.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(kind) {
            return Err(BridgeError::RunInProgress(kind));
        }
        Ok(RunClaim {
            kind,
            active: self.active_runs.clone(),
        })
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn status(&self, phase: Phase) -> PhaseStatus {
        self.state.status(phase)
    }

    pub fn is_phase_available(&self, phase: Phase) -> bool {
        self.state.is_phase_available(phase)
    }

    pub fn is_phase_complete(&self, phase: Phase) -> bool {
        self.state.is_phase_complete(phase)
    }

    /// Apply an action to the latest stored state; accepted actions are
    /// persisted before returning
    pub async fn apply(&mut self, action: WizardAction) -> Result<TransitionOutcome> {
        self.refresh().await?;
        if action == WizardAction::Reset {
            self.store
                .clear(&self.state.source_key, &self.state.target_key)
                .await?;
        }

        match transition(&self.state, &action, Utc::now()) {
            Transition::Applied(next) => {
                self.store.save(&next).await?;
                self.state = next;
                Ok(TransitionOutcome::Applied)
            }
            Transition::Rejected { reason } => {
                warn!(
                    "Rejected wizard action for {} -> {}: {}",
                    self.state.source_key, self.state.target_key, reason
                );
                Ok(TransitionOutcome::Rejected { reason })
            }
        }
    }

    pub async fn go_to_phase(&mut self, phase: Phase) -> Result<TransitionOutcome> {
        self.apply(WizardAction::GoToPhase { phase }).await
    }

    pub async fn start_phase(&mut self, phase: Phase) -> Result<TransitionOutcome> {
        self.apply(WizardAction::StartPhase { phase }).await
    }

    pub async fn complete_phase(
        &mut self,
        phase: Phase,
        data: Option<PhaseData>,
    ) -> Result<TransitionOutcome> {
        self.apply(WizardAction::CompletePhase { phase, data }).await
    }

    /// Complete the phase a typed payload belongs to
    pub async fn complete_with<P: PhasePayload>(&mut self, payload: P) -> Result<TransitionOutcome> {
        self.complete_phase(P::PHASE, Some(payload.into_data())).await
    }

    pub async fn skip_phase(&mut self, phase: Phase) -> Result<TransitionOutcome> {
        self.apply(WizardAction::SkipPhase { phase }).await
    }

    pub async fn update_phase_data(
        &mut self,
        phase: Phase,
        data: PhaseData,
    ) -> Result<TransitionOutcome> {
        self.apply(WizardAction::UpdatePhaseData { phase, data }).await
    }

    pub async fn reset(&mut self) -> Result<TransitionOutcome> {
        self.apply(WizardAction::Reset).await
    }
}

/// Open sessions keyed by store pair.
///
/// Each session sits behind its own mutex so that all transitions (and
/// therefore all saves) for a pair are serialized. Sessions are reloaded
/// from the store when handed out, and sessions nobody holds are dropped
/// whenever a new pair is opened.
pub struct SessionRegistry {
    store: Arc<dyn WizardStore>,
    sessions: RwLock<HashMap<(String, String), Arc<Mutex<WizardSession>>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn WizardStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Session for a pair, opening it on first use
    pub async fn session(
        &self,
        source_key: &str,
        target_key: &str,
    ) -> Result<Arc<Mutex<WizardSession>>> {
        let key = (source_key.to_string(), target_key.to_string());

        let cached = self.sessions.read().await.get(&key).cloned();
        let session = match cached {
            Some(session) => session,
            None => {
                let mut sessions = self.sessions.write().await;
                match sessions.get(&key) {
                    Some(session) => session.clone(),
                    None => {
                        sessions.retain(|_, session| Arc::strong_count(session) > 1);
                        let session =
                            WizardSession::open(self.store.clone(), source_key, target_key).await?;
                        let session = Arc::new(Mutex::new(session));
                        sessions.insert(key, session.clone());
                        return Ok(session);
                    }
                }
            }
        };

        session.lock().await.refresh().await?;
        Ok(session)
    }

    /// Number of cached sessions
    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}
