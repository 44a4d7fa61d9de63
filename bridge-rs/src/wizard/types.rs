//! Wizard types: phases, per-phase state and typed phase payloads

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::BridgeError;
use crate::migration::{EntityKind, EntityProgress, IdMapping, MigrationStats};

/// One stage of the migration wizard.
///
/// Serialized as its ordinal (1-4), including when used as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Categories
    Foundation,
    /// Products and customers
    CoreData,
    /// Orders and coupons
    Transactions,
    /// Reviews, pages and blog posts
    Content,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Foundation,
        Phase::CoreData,
        Phase::Transactions,
        Phase::Content,
    ];

    pub fn ordinal(&self) -> u8 {
        match self {
            Phase::Foundation => 1,
            Phase::CoreData => 2,
            Phase::Transactions => 3,
            Phase::Content => 4,
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Phase::Foundation | Phase::CoreData)
    }

    /// Phases that must be complete (or skipped) before this one opens
    pub fn prerequisites(&self) -> &'static [Phase] {
        match self {
            Phase::Foundation => &[],
            Phase::CoreData => &[Phase::Foundation],
            Phase::Transactions | Phase::Content => &[Phase::CoreData],
        }
    }

    /// Entities migrated while this phase is active
    pub fn entities(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|kind| kind.phase() == *self)
            .collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Foundation => "Foundation",
            Phase::CoreData => "Core Data",
            Phase::Transactions => "Transactions",
            Phase::Content => "Content",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.ordinal(), self.name())
    }
}

impl TryFrom<u8> for Phase {
    type Error = BridgeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Foundation),
            2 => Ok(Phase::CoreData),
            3 => Ok(Phase::Transactions),
            4 => Ok(Phase::Content),
            other => Err(BridgeError::InvalidInput(format!(
                "phase must be between 1 and 4, got {}",
                other
            ))),
        }
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.ordinal())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ordinal = u8::deserialize(deserializer)?;
        Phase::try_from(ordinal).map_err(de::Error::custom)
    }
}

/// Phase status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Prerequisites not yet satisfied
    Locked,
    /// Ready to run
    Pending,
    /// Started, not finished
    InProgress,
    /// Finished
    Complete,
    /// Optional phase the user chose not to run
    Skipped,
}

impl PhaseStatus {
    /// Complete or skipped; both satisfy downstream prerequisites
    pub fn is_settled(&self) -> bool {
        matches!(self, PhaseStatus::Complete | PhaseStatus::Skipped)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Locked => "locked",
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Complete => "complete",
            PhaseStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Payload attached to a phase.
///
/// Implemented by each per-phase result type so callers can work with the
/// concrete struct and convert at the boundary.
pub trait PhasePayload: Sized {
    const PHASE: Phase;

    /// Merge a partial update into `self`; must be idempotent
    fn merge(&mut self, partial: &Self);

    fn into_data(self) -> PhaseData;

    fn from_data(data: &PhaseData) -> Option<&Self>;
}

/// Result summary of the Foundation phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundationData {
    #[serde(default)]
    pub categories_created: u64,
    #[serde(default)]
    pub categories_skipped: u64,
    #[serde(default)]
    pub categories_errored: u64,
    #[serde(default)]
    pub category_id_mapping: IdMapping,
    #[serde(default)]
    pub migrated_category_ids: BTreeSet<u64>,
    /// Stats of the most recent category run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<MigrationStats>,
}

impl PhasePayload for FoundationData {
    const PHASE: Phase = Phase::Foundation;

    fn merge(&mut self, partial: &Self) {
        self.categories_created = partial.categories_created;
        self.categories_skipped = partial.categories_skipped;
        self.categories_errored = partial.categories_errored;
        self.category_id_mapping.merge(&partial.category_id_mapping);
        self.migrated_category_ids
            .extend(partial.migrated_category_ids.iter().copied());
        // Every mapped category is present in the target
        self.migrated_category_ids
            .extend(partial.category_id_mapping.iter().map(|(source, _)| source));
        if partial.last_run.is_some() {
            self.last_run = partial.last_run.clone();
        }
    }

    fn into_data(self) -> PhaseData {
        PhaseData::Foundation(self)
    }

    fn from_data(data: &PhaseData) -> Option<&Self> {
        match data {
            PhaseData::Foundation(d) => Some(d),
            _ => None,
        }
    }
}

/// Result summary of the Core Data phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreDataData {
    #[serde(default)]
    pub products: EntityProgress,
    #[serde(default)]
    pub customers: EntityProgress,
    /// Source category IDs whose products have been fully migrated
    #[serde(default)]
    pub completed_categories: BTreeSet<u64>,
}

impl PhasePayload for CoreDataData {
    const PHASE: Phase = Phase::CoreData;

    fn merge(&mut self, partial: &Self) {
        self.products.merge(&partial.products);
        self.customers.merge(&partial.customers);
        self.completed_categories
            .extend(partial.completed_categories.iter().copied());
    }

    fn into_data(self) -> PhaseData {
        PhaseData::CoreData(self)
    }

    fn from_data(data: &PhaseData) -> Option<&Self> {
        match data {
            PhaseData::CoreData(d) => Some(d),
            _ => None,
        }
    }
}

/// Result summary of the Transactions phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsData {
    #[serde(default)]
    pub orders: EntityProgress,
    #[serde(default)]
    pub coupons: EntityProgress,
}

impl PhasePayload for TransactionsData {
    const PHASE: Phase = Phase::Transactions;

    fn merge(&mut self, partial: &Self) {
        self.orders.merge(&partial.orders);
        self.coupons.merge(&partial.coupons);
    }

    fn into_data(self) -> PhaseData {
        PhaseData::Transactions(self)
    }

    fn from_data(data: &PhaseData) -> Option<&Self> {
        match data {
            PhaseData::Transactions(d) => Some(d),
            _ => None,
        }
    }
}

/// Result summary of the Content phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentData {
    #[serde(default)]
    pub reviews: EntityProgress,
    #[serde(default)]
    pub pages: EntityProgress,
    #[serde(default)]
    pub posts: EntityProgress,
}

impl PhasePayload for ContentData {
    const PHASE: Phase = Phase::Content;

    fn merge(&mut self, partial: &Self) {
        self.reviews.merge(&partial.reviews);
        self.pages.merge(&partial.pages);
        self.posts.merge(&partial.posts);
    }

    fn into_data(self) -> PhaseData {
        PhaseData::Content(self)
    }

    fn from_data(data: &PhaseData) -> Option<&Self> {
        match data {
            PhaseData::Content(d) => Some(d),
            _ => None,
        }
    }
}

/// Phase payload, one variant per phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum PhaseData {
    Foundation(FoundationData),
    CoreData(CoreDataData),
    Transactions(TransactionsData),
    Content(ContentData),
}

impl PhaseData {
    /// Empty payload for a phase
    pub fn empty(phase: Phase) -> Self {
        match phase {
            Phase::Foundation => PhaseData::Foundation(FoundationData::default()),
            Phase::CoreData => PhaseData::CoreData(CoreDataData::default()),
            Phase::Transactions => PhaseData::Transactions(TransactionsData::default()),
            Phase::Content => PhaseData::Content(ContentData::default()),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            PhaseData::Foundation(_) => Phase::Foundation,
            PhaseData::CoreData(_) => Phase::CoreData,
            PhaseData::Transactions(_) => Phase::Transactions,
            PhaseData::Content(_) => Phase::Content,
        }
    }

    /// Merge a partial payload of the same phase.
    ///
    /// Returns `false` and leaves `self` untouched on a phase mismatch.
    pub fn merge(&mut self, partial: &PhaseData) -> bool {
        match (self, partial) {
            (PhaseData::Foundation(a), PhaseData::Foundation(b)) => a.merge(b),
            (PhaseData::CoreData(a), PhaseData::CoreData(b)) => a.merge(b),
            (PhaseData::Transactions(a), PhaseData::Transactions(b)) => a.merge(b),
            (PhaseData::Content(a), PhaseData::Content(b)) => a.merge(b),
            _ => return false,
        }
        true
    }

    /// Durable progress of one entity, if it belongs to this phase
    pub fn progress(&self, kind: EntityKind) -> Option<EntityProgress> {
        match (self, kind) {
            (PhaseData::Foundation(d), EntityKind::Categories) => Some(EntityProgress {
                stats: d.last_run.clone(),
                migrated_ids: d.migrated_category_ids.clone(),
                id_mapping: d.category_id_mapping.clone(),
            }),
            (PhaseData::CoreData(d), EntityKind::Products) => Some(d.products.clone()),
            (PhaseData::CoreData(d), EntityKind::Customers) => Some(d.customers.clone()),
            (PhaseData::Transactions(d), EntityKind::Orders) => Some(d.orders.clone()),
            (PhaseData::Transactions(d), EntityKind::Coupons) => Some(d.coupons.clone()),
            (PhaseData::Content(d), EntityKind::Reviews) => Some(d.reviews.clone()),
            (PhaseData::Content(d), EntityKind::Pages) => Some(d.pages.clone()),
            (PhaseData::Content(d), EntityKind::Posts) => Some(d.posts.clone()),
            _ => None,
        }
    }
}

/// State of a single phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub status: PhaseStatus,
    pub data: PhaseData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PhaseState {
    pub fn initial(phase: Phase) -> Self {
        Self {
            status: if phase.is_required() {
                PhaseStatus::Pending
            } else {
                PhaseStatus::Locked
            },
            data: PhaseData::empty(phase),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Wizard state for one source/target store pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardState {
    pub current_phase: Phase,
    pub phases: BTreeMap<Phase, PhaseState>,
    /// Source store identifier (WooCommerce site)
    pub source_key: String,
    /// Target store identifier (BigCommerce store hash)
    pub target_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WizardState {
    /// Fresh state: required phases pending, optional phases locked
    pub fn new(source_key: impl Into<String>, target_key: impl Into<String>) -> Self {
        Self {
            current_phase: Phase::Foundation,
            phases: Phase::ALL
                .into_iter()
                .map(|phase| (phase, PhaseState::initial(phase)))
                .collect(),
            source_key: source_key.into(),
            target_key: target_key.into(),
            updated_at: None,
        }
    }

    /// State of a phase; a missing entry reads as its initial state
    pub fn phase(&self, phase: Phase) -> PhaseState {
        self.phases
            .get(&phase)
            .cloned()
            .unwrap_or_else(|| PhaseState::initial(phase))
    }

    pub fn status(&self, phase: Phase) -> PhaseStatus {
        self.phases
            .get(&phase)
            .map(|p| p.status)
            .unwrap_or_else(|| PhaseState::initial(phase).status)
    }

    /// Every prerequisite of `phase` is complete or skipped
    pub fn is_phase_available(&self, phase: Phase) -> bool {
        phase
            .prerequisites()
            .iter()
            .all(|p| self.status(*p).is_settled())
    }

    pub fn is_phase_complete(&self, phase: Phase) -> bool {
        self.status(phase).is_settled()
    }

    /// Durable progress of one entity
    pub fn progress(&self, kind: EntityKind) -> EntityProgress {
        self.phase(kind.phase())
            .data
            .progress(kind)
            .unwrap_or_default()
    }

    /// ID mapping built so far for an entity
    pub fn id_mapping(&self, kind: EntityKind) -> IdMapping {
        self.progress(kind).id_mapping
    }

    /// Typed view of a phase payload
    pub fn payload<P: PhasePayload>(&self) -> Option<&P> {
        self.phases.get(&P::PHASE).and_then(|p| P::from_data(&p.data))
    }

    /// Equality ignoring timestamps
    pub fn same_progress(&self, other: &WizardState) -> bool {
        let strip = |s: &WizardState| {
            let mut s = s.clone();
            s.updated_at = None;
            for phase in s.phases.values_mut() {
                phase.started_at = None;
                phase.completed_at = None;
            }
            s
        };
        strip(self) == strip(other)
    }
}
