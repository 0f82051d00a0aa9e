//! Services module for billing-service.

pub mod allocation;
pub mod database;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod posting;
pub mod sequencer;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
