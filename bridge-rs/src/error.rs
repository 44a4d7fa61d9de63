use thiserror::Error;

use crate::migration::EntityKind;
use crate::wizard::Phase;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fetch {entity} from source: {message}")]
    Fetch { entity: EntityKind, message: String },

    #[error("Cannot migrate {entity}: {dependency} mapping is empty")]
    DependencyNotSatisfied {
        entity: EntityKind,
        dependency: EntityKind,
    },

    #[error("Phase {0} is not available yet")]
    PhaseUnavailable(Phase),

    #[error("A {0} run is already in progress for this store pair")]
    RunInProgress(EntityKind),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
