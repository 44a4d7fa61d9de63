//! Entity migration: transforms, the batch executor and the phase runner

pub mod executor;
pub mod runner;
pub mod transform;
pub mod types;

pub use executor::{BatchExecutor, CANCELLED_MESSAGE};
pub use runner::{checkpoint_data, stored_mappings, PhaseRunner, RunRequest};
pub use transform::{transform, TransformError, Transformed};
pub use types::*;
