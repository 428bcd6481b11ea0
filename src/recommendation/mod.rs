//! Recommendation Module
//!
//! Batch-generated movie recommendations. A batch run computes a ranked list
//! per eligible user with one of four strategies and stores it as an immutable,
//! versioned batch; readers always see the most recent successful batch.
//!
//! ## Architecture
//!
//! 1. **Store** - Ratings, watch history, genres and batch persistence
//! 2. **Similarity** - Cosine similarity between user rating vectors
//! 3. **Strategies** - Popularity, content, collaborative and hybrid candidate generation
//! 4. **Orchestrator** - Validation, run guard, ranking and the atomic commit
//! 5. **Reader** - Latest batch lookup per user, batch history
//!
//! ## Strategies
//!
//! - **Popularity**: most-watched movies in the recent window, shared by every user
//! - **Content**: unseen active movies from the user's top genres
//! - **Collaborative**: similarity-weighted average of other users' ratings
//! - **Hybrid**: 0.2 × popularity + 0.4 × content + 0.4 × collaborative

pub mod algorithm;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod preferences;
pub mod reader;
pub mod scheduler;
pub mod similarity;
pub mod store;
pub mod strategies;

pub use algorithm::Algorithm;
pub use orchestrator::{BatchOrchestrator, BatchOutcome};
pub use reader::RecommendationReader;
pub use store::{MemoryStore, PgStore, RecommendationStore};
