//! Progress events emitted by a migration run

use serde::{Deserialize, Serialize};

use crate::migration::{EntityKind, IdMapping, MigrationStats};

/// One record of the progress stream.
///
/// A run emits `Started`, any number of `Progress`, then exactly one of
/// `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        entity: EntityKind,
        /// Items in the source collection
        total: u64,
        /// Items skipped because they are in the resume set
        already_migrated: u64,
    },

    #[serde(rename_all = "camelCase")]
    Progress {
        completed: u64,
        total: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Complete {
        stats: MigrationStats,
        migrated_ids: Vec<u64>,
        id_mapping: IdMapping,
    },

    Error { message: String },
}

impl ProgressEvent {
    /// `Complete` and `Error` end a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }
}
