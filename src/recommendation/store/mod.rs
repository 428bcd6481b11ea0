//! Rating/Interaction Store
//!
//! The engine's only view of persistent data. Reads come from the catalog
//! tables (ratings, watch history, genre membership, movies, users); writes go
//! to the batch and item tables.
//!
//! Two implementations:
//! - [`PgStore`] backed by PostgreSQL through sqlx
//! - [`MemoryStore`] holding the same relations in process, for tests and local runs

use async_trait::async_trait;

use super::algorithm::Algorithm;
use super::model::{
    BatchId, BatchParams, BatchStatus, GenreId, MovieCount, MovieId, NewRecommendation,
    RatingEvent, RecommendationBatch, RecommendationItem, UserId,
};
use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Which of the user's own interactions exclude a content candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateExclusions {
    pub rated: bool,
    pub watched: bool,
}

impl Default for CandidateExclusions {
    fn default() -> Self {
        Self {
            rated: true,
            watched: true,
        }
    }
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Users with status `active` and role `user`, ascending by id
    async fn fetch_active_user_ids(&self) -> Result<Vec<UserId>>;

    /// Every explicit rating
    async fn fetch_all_ratings(&self) -> Result<Vec<RatingEvent>>;

    /// Watch counts inside the last `window_days`, ordered by count desc then movie id desc
    async fn fetch_recent_watch_counts(
        &self,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<MovieCount>>;

    /// Rating counts per movie, ordered by count desc then movie id desc
    async fn fetch_rating_counts(&self, limit: usize) -> Result<Vec<MovieCount>>;

    /// The user's most frequent genres from ratings, falling back to watch history.
    /// Ties keep the order in which the genres first appeared.
    async fn fetch_user_top_genres(&self, user_id: UserId, limit: usize) -> Result<Vec<GenreId>>;

    /// Active movies in any of `genre_ids`, minus the user's excluded interactions,
    /// ordered by movie id desc
    async fn fetch_genre_candidate_movies(
        &self,
        user_id: UserId,
        genre_ids: &[GenreId],
        exclusions: CandidateExclusions,
        limit: usize,
    ) -> Result<Vec<MovieId>>;

    /// Write a batch record with no items
    async fn create_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        status: BatchStatus,
    ) -> Result<BatchId>;

    /// Write a batch and all of its items atomically; the batch becomes visible
    /// to readers as `success` only once every item is stored
    async fn commit_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        items: &[NewRecommendation],
    ) -> Result<RecommendationBatch>;

    /// Most recent batch with status `success`, optionally of one algorithm
    async fn fetch_latest_successful_batch(
        &self,
        algorithm: Option<Algorithm>,
    ) -> Result<Option<RecommendationBatch>>;

    /// The user's items of one batch, ordered by rank
    async fn fetch_batch_items_for_user(
        &self,
        batch_id: BatchId,
        user_id: UserId,
    ) -> Result<Vec<RecommendationItem>>;

    /// Most recent batches of any status
    async fn list_batches(&self, limit: usize) -> Result<Vec<RecommendationBatch>>;

    /// Liveness probe
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
