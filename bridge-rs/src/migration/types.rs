//! Migration types and data structures

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;
use crate::wizard::Phase;

/// Default number of items written per batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Entity collections that can be migrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Product categories
    Categories,
    /// Catalog products
    Products,
    /// Customer accounts
    Customers,
    /// Historical orders
    Orders,
    /// Discount coupons
    Coupons,
    /// Product reviews
    Reviews,
    /// WordPress pages
    Pages,
    /// WordPress blog posts
    Posts,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Categories,
        EntityKind::Products,
        EntityKind::Customers,
        EntityKind::Orders,
        EntityKind::Coupons,
        EntityKind::Reviews,
        EntityKind::Pages,
        EntityKind::Posts,
    ];

    /// Wizard phase this entity is migrated in
    pub fn phase(&self) -> Phase {
        match self {
            EntityKind::Categories => Phase::Foundation,
            EntityKind::Products | EntityKind::Customers => Phase::CoreData,
            EntityKind::Orders | EntityKind::Coupons => Phase::Transactions,
            EntityKind::Reviews | EntityKind::Pages | EntityKind::Posts => Phase::Content,
        }
    }

    /// ID mappings that must be non-empty before this entity can run
    pub fn dependencies(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Products => &[EntityKind::Categories],
            EntityKind::Orders => &[EntityKind::Products, EntityKind::Customers],
            EntityKind::Reviews => &[EntityKind::Products],
            _ => &[],
        }
    }

    /// Some other entity needs this entity's ID mapping
    pub fn is_referenced(&self) -> bool {
        EntityKind::ALL
            .iter()
            .any(|other| other.dependencies().contains(self))
    }

    /// Target field used to detect an item that already exists
    pub fn natural_key(&self) -> Option<&'static str> {
        match self {
            EntityKind::Categories => Some("name"),
            EntityKind::Products => Some("sku"),
            EntityKind::Customers => Some("email"),
            EntityKind::Orders => Some("external_id"),
            EntityKind::Coupons => Some("code"),
            EntityKind::Reviews => None,
            EntityKind::Pages | EntityKind::Posts => Some("url"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Categories => "categories",
            EntityKind::Products => "products",
            EntityKind::Customers => "customers",
            EntityKind::Orders => "orders",
            EntityKind::Coupons => "coupons",
            EntityKind::Reviews => "reviews",
            EntityKind::Pages => "pages",
            EntityKind::Posts => "posts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "categories" | "category" => Ok(EntityKind::Categories),
            "products" | "product" => Ok(EntityKind::Products),
            "customers" | "customer" => Ok(EntityKind::Customers),
            "orders" | "order" => Ok(EntityKind::Orders),
            "coupons" | "coupon" => Ok(EntityKind::Coupons),
            "reviews" | "review" => Ok(EntityKind::Reviews),
            "pages" | "page" => Ok(EntityKind::Pages),
            "posts" | "post" | "blog" => Ok(EntityKind::Posts),
            other => Err(BridgeError::InvalidInput(format!(
                "unknown entity type: {}",
                other
            ))),
        }
    }
}

/// Source ID to target ID correspondence for one entity type.
///
/// Entries are only ever added; merging two mappings keeps the union.
/// Serialized as a JSON object keyed by the decimal source ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping(BTreeMap<u64, u64>);

// Keys go through strings explicitly: integer keys do not survive the
// buffering serde does for internally tagged enums.
impl Serialize for IdMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(s, t)| (s.to_string(), t)))
    }
}

impl<'de> Deserialize<'de> for IdMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, u64>::deserialize(deserializer)?
            .into_iter()
            .map(|(source, target)| {
                source
                    .trim()
                    .parse::<u64>()
                    .map(|source| (source, target))
                    .map_err(|_| de::Error::custom(format!("invalid source id '{}'", source)))
            })
            .collect()
    }
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_id: u64, target_id: u64) {
        self.0.insert(source_id, target_id);
    }

    pub fn get(&self, source_id: u64) -> Option<u64> {
        self.0.get(&source_id).copied()
    }

    pub fn contains(&self, source_id: u64) -> bool {
        self.0.contains_key(&source_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add every entry of `other`, letting `other` win on conflicts
    pub fn merge(&mut self, other: &IdMapping) {
        for (source, target) in &other.0 {
            self.0.insert(*source, *target);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.0.iter().map(|(s, t)| (*s, *t))
    }
}

impl FromIterator<(u64, u64)> for IdMapping {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Aggregate outcome counters for one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStats {
    /// Items accounted for in this run
    pub total: u64,
    /// Items written to the target
    pub successful: u64,
    /// Items already present (resume set or natural-key duplicate)
    pub skipped: u64,
    /// Items the target rejected
    pub failed: u64,
    /// Subset of `skipped` that came from the resume set
    #[serde(default)]
    pub resumed: u64,
    /// One message per failed or partially transformed item
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl MigrationStats {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.total += 1;
        match outcome {
            ItemOutcome::Migrated { .. } => self.successful += 1,
            ItemOutcome::Duplicate { .. } => self.skipped += 1,
            ItemOutcome::Resumed => {
                self.skipped += 1;
                self.resumed += 1;
            }
            ItemOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// `total == successful + skipped + failed`
    pub fn is_conserved(&self) -> bool {
        self.total == self.successful + self.skipped + self.failed
    }

    /// Items that were written or found already present in the target
    pub fn settled(&self) -> u64 {
        self.successful + self.skipped
    }
}

/// Outcome of migrating one source item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Created in the target
    Migrated { target_id: u64 },
    /// Natural-key collision in the target
    Duplicate { existing_id: Option<u64> },
    /// Present in the resume set, never sent to the target
    Resumed,
    /// Rejected by the target or failed to transform
    Failed { message: String },
}

/// Durable per-entity progress nested inside phase data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProgress {
    /// Stats of the most recent run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MigrationStats>,
    /// Resume set: source IDs already present in the target
    #[serde(default)]
    pub migrated_ids: BTreeSet<u64>,
    #[serde(default)]
    pub id_mapping: IdMapping,
}

impl EntityProgress {
    /// Overwrite stats when the incoming value carries them, union the rest
    pub fn merge(&mut self, other: &EntityProgress) {
        if let Some(stats) = &other.stats {
            self.stats = Some(stats.clone());
        }
        self.migrated_ids.extend(other.migrated_ids.iter().copied());
        self.id_mapping.merge(&other.id_mapping);
    }

    pub fn from_report(report: &RunReport) -> Self {
        Self {
            stats: Some(report.stats.clone()),
            migrated_ids: report.migrated_ids.iter().copied().collect(),
            id_mapping: report.id_mapping.clone(),
        }
    }
}

/// ID mappings handed to a run that references other entities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyMappings {
    #[serde(default)]
    pub categories: IdMapping,
    #[serde(default)]
    pub products: IdMapping,
    #[serde(default)]
    pub customers: IdMapping,
}

impl DependencyMappings {
    pub fn get(&self, kind: EntityKind) -> Option<&IdMapping> {
        match kind {
            EntityKind::Categories => Some(&self.categories),
            EntityKind::Products => Some(&self.products),
            EntityKind::Customers => Some(&self.customers),
            _ => None,
        }
    }

    /// First dependency of `kind` whose mapping is empty
    pub fn missing_for(&self, kind: EntityKind) -> Option<EntityKind> {
        kind.dependencies()
            .iter()
            .copied()
            .find(|dep| self.get(*dep).map_or(true, IdMapping::is_empty))
    }

    /// Fill empty slots from `other`
    pub fn or_from(mut self, other: &DependencyMappings) -> Self {
        if self.categories.is_empty() {
            self.categories = other.categories.clone();
        }
        if self.products.is_empty() {
            self.products = other.products.clone();
        }
        if self.customers.is_empty() {
            self.customers = other.customers.clone();
        }
        self
    }
}

/// Everything one executor invocation needs
#[derive(Debug, Clone)]
pub struct EntityRun {
    pub kind: EntityKind,
    /// Restrict the source listing (category ID for products)
    pub scope: Option<u64>,
    /// Source IDs already migrated by earlier runs
    pub resume: BTreeSet<u64>,
    pub mappings: DependencyMappings,
    pub batch_size: usize,
}

impl EntityRun {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            scope: None,
            resume: BTreeSet::new(),
            mappings: DependencyMappings::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_resume(mut self, resume: impl IntoIterator<Item = u64>) -> Self {
        self.resume = resume.into_iter().collect();
        self
    }

    pub fn with_mappings(mut self, mappings: DependencyMappings) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_scope(mut self, scope: Option<u64>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Result of one executor run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub entity: EntityKind,
    pub stats: MigrationStats,
    /// Source IDs written or found present during this run
    pub migrated_ids: Vec<u64>,
    /// Mapping entries learned during this run
    pub id_mapping: IdMapping,
    /// Run stopped early on cancellation
    #[serde(default)]
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            stats: MigrationStats::default(),
            migrated_ids: Vec::new(),
            id_mapping: IdMapping::new(),
            cancelled: false,
        }
    }
}
