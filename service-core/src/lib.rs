//! service-core: Shared infrastructure for the ardua-books services.
pub mod config;
pub mod error;
pub mod observability;

pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
