//! REST API module for bridge-rs
//!
//! Wizard state endpoints and the streamed migration endpoint

pub mod handlers;
pub mod server;

pub use handlers::{ApiResponse, AppState, MigrateRequest, WizardResponse};
pub use server::ApiServer;
