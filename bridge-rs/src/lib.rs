//! bridge-rs: resumable WooCommerce to BigCommerce migration orchestrator
//!
//! Moves a store in four gated phases and can stop and resume at any point
//! without writing an item twice.
//!
//! # Features
//!
//! - **Wizard**: Foundation, Core Data, Transactions and Content phases with
//!   prerequisite gating and auto-saved state per store pair
//! - **Resumable runs**: previously migrated source IDs are never re-submitted
//! - **Progress streams**: `started`/`progress`/`complete`/`error` events
//!   over Server-Sent-Events framing
//! - **Throttling**: one process-wide limiter for target API writes
//!
//! # Example
//!
//! ```no_run
//! use bridge_rs::config::Config;
//! use bridge_rs::clients::RestClientFactory;
//! use bridge_rs::api::ApiServer;
//! use bridge_rs::storage::SqliteWizardStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = SqliteWizardStore::connect(
//!         &config.storage.database_url,
//!         &config.migration.namespace,
//!     )
//!     .await?;
//!
//!     let server = ApiServer::new(config, Arc::new(store), Arc::new(RestClientFactory));
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`wizard`]: Phase state machine and sessions
//! - [`migration`]: Transforms, batch executor and phase runner
//! - [`progress`]: Progress events, sinks and SSE framing
//! - [`storage`]: Wizard state persistence
//! - [`clients`]: Source and target store clients
//! - [`throttle`]: Target API rate limiting
//! - [`api`]: HTTP API

pub mod api;
pub mod clients;
pub mod config;
pub mod error;
pub mod migration;
pub mod progress;
pub mod storage;
pub mod throttle;
pub mod wizard;

pub use config::Config;
pub use error::{BridgeError, Result};
