//! Keepsake - fulfillment service for personalized digital gifts
//!
//! Keepsake turns a paid order into a delivered artifact:
//!
//! - **Generation**: commission content from external providers and poll
//!   their job endpoints to a guaranteed-terminal result
//! - **Reconciliation**: turn payment webhook events into ledger state,
//!   idempotently, in payment -> order -> gift commit order
//! - **Scheduling**: release scheduled gifts when their time arrives and
//!   resolve reveal transitions orphaned by a crash
//! - **Knots**: the sealed-reveal gift variant, a token-gated state
//!   machine over tied / untying / untied

pub mod config;
pub mod db;
pub mod delivery;
pub mod email;
pub mod generation;
pub mod intake;
pub mod knot;
pub mod logging;
pub mod payments;
pub mod reconcile;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{KeepsakeError, Result};
