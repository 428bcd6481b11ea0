//! Movie recommendation batch engine
//!
//! Re-exports core modules for integration tests and external use.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod recommendation;

// Re-export commonly used types
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use recommendation::{
    Algorithm, BatchOrchestrator, BatchOutcome, MemoryStore, PgStore, RecommendationReader,
    RecommendationStore,
};
