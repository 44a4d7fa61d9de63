//! Phase state machine
//!
//! `transition` is a pure function: it never performs I/O and never fails.
//! Invalid requests come back as [`Transition::Rejected`] with the original
//! state left untouched; persisting and logging are the caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Phase, PhaseData, PhaseState, PhaseStatus, WizardState};

/// A request to change wizard state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WizardAction {
    GoToPhase { phase: Phase },
    StartPhase { phase: Phase },
    CompletePhase {
        phase: Phase,
        #[serde(default)]
        data: Option<PhaseData>,
    },
    SkipPhase { phase: Phase },
    UpdatePhaseData { phase: Phase, data: PhaseData },
    Reset,
}

impl WizardAction {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            WizardAction::GoToPhase { phase }
            | WizardAction::StartPhase { phase }
            | WizardAction::CompletePhase { phase, .. }
            | WizardAction::SkipPhase { phase }
            | WizardAction::UpdatePhaseData { phase, .. } => Some(*phase),
            WizardAction::Reset => None,
        }
    }
}

/// Result of applying an action
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Action accepted; the new state
    Applied(WizardState),
    /// Action ignored; state unchanged
    Rejected { reason: String },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    fn reject(reason: impl Into<String>) -> Self {
        Transition::Rejected {
            reason: reason.into(),
        }
    }
}

/// Apply `action` to `state` at time `now`
pub fn transition(state: &WizardState, action: &WizardAction, now: DateTime<Utc>) -> Transition {
    match action {
        WizardAction::GoToPhase { phase } => go_to_phase(state, *phase, now),
        WizardAction::StartPhase { phase } => start_phase(state, *phase, now),
        WizardAction::CompletePhase { phase, data } => {
            complete_phase(state, *phase, data.as_ref(), now)
        }
        WizardAction::SkipPhase { phase } => skip_phase(state, *phase, now),
        WizardAction::UpdatePhaseData { phase, data } => {
            update_phase_data(state, *phase, data, now)
        }
        WizardAction::Reset => {
            let mut fresh = WizardState::new(state.source_key.clone(), state.target_key.clone());
            fresh.updated_at = Some(now);
            Transition::Applied(fresh)
        }
    }
}

fn go_to_phase(state: &WizardState, phase: Phase, now: DateTime<Utc>) -> Transition {
    if !state.is_phase_available(phase) {
        return Transition::reject(format!(
            "cannot navigate to phase {}: prerequisites are not complete",
            phase
        ));
    }

    let mut next = state.clone();
    next.current_phase = phase;
    next.updated_at = Some(now);
    Transition::Applied(next)
}

fn start_phase(state: &WizardState, phase: Phase, now: DateTime<Utc>) -> Transition {
    if !state.is_phase_available(phase) {
        return Transition::reject(format!("cannot start phase {}: not available", phase));
    }

    match state.status(phase) {
        PhaseStatus::Pending => {}
        PhaseStatus::InProgress => return Transition::Applied(state.clone()),
        other => {
            return Transition::reject(format!(
                "cannot start phase {} from status {}",
                phase, other
            ))
        }
    }

    let mut next = state.clone();
    let entry = phase_entry(&mut next, phase);
    entry.status = PhaseStatus::InProgress;
    entry.started_at = Some(now);
    next.updated_at = Some(now);
    Transition::Applied(next)
}

fn complete_phase(
    state: &WizardState,
    phase: Phase,
    data: Option<&PhaseData>,
    now: DateTime<Utc>,
) -> Transition {
    if !state.is_phase_available(phase) {
        return Transition::reject(format!("cannot complete phase {}: not available", phase));
    }

    let status = state.status(phase);
    if !matches!(
        status,
        PhaseStatus::Pending | PhaseStatus::InProgress | PhaseStatus::Complete
    ) {
        return Transition::reject(format!(
            "cannot complete phase {} from status {}",
            phase, status
        ));
    }

    let mut next = state.clone();
    let entry = phase_entry(&mut next, phase);
    if let Some(data) = data {
        if !entry.data.merge(data) {
            return Transition::reject(format!(
                "payload for phase {} does not belong to phase {}",
                data.phase(),
                phase
            ));
        }
    }
    entry.status = PhaseStatus::Complete;
    if entry.completed_at.is_none() {
        entry.completed_at = Some(now);
    }

    unlock_dependents(&mut next);
    next.updated_at = Some(now);
    Transition::Applied(next)
}

fn skip_phase(state: &WizardState, phase: Phase, now: DateTime<Utc>) -> Transition {
    if phase.is_required() {
        return Transition::reject(format!("phase {} is required and cannot be skipped", phase));
    }

    match state.status(phase) {
        PhaseStatus::Skipped => return Transition::Applied(state.clone()),
        PhaseStatus::Complete => {
            return Transition::reject(format!("phase {} is already complete", phase))
        }
        _ => {}
    }

    let mut next = state.clone();
    let entry = phase_entry(&mut next, phase);
    entry.status = PhaseStatus::Skipped;
    entry.completed_at = Some(now);

    unlock_dependents(&mut next);
    next.updated_at = Some(now);
    Transition::Applied(next)
}

fn update_phase_data(
    state: &WizardState,
    phase: Phase,
    data: &PhaseData,
    now: DateTime<Utc>,
) -> Transition {
    let mut next = state.clone();
    let entry = phase_entry(&mut next, phase);
    if !entry.data.merge(data) {
        return Transition::reject(format!(
            "payload for phase {} does not belong to phase {}",
            data.phase(),
            phase
        ));
    }
    next.updated_at = Some(now);
    Transition::Applied(next)
}

/// Move every locked phase whose prerequisites are settled to pending
fn unlock_dependents(state: &mut WizardState) {
    for phase in Phase::ALL {
        if state.status(phase) == PhaseStatus::Locked && state.is_phase_available(phase) {
            phase_entry(state, phase).status = PhaseStatus::Pending;
        }
    }
}

fn phase_entry(state: &mut WizardState, phase: Phase) -> &mut PhaseState {
    state
        .phases
        .entry(phase)
        .or_insert_with(|| PhaseState::initial(phase))
}
