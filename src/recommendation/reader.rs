//! Recommendation Reader and batch history

use std::sync::Arc;
use tracing::debug;

use super::algorithm::Algorithm;
use super::model::{RecommendationBatch, Recommendations, UserId};
use super::store::RecommendationStore;
use crate::error::Result;

pub const DEFAULT_BATCH_LIST_LIMIT: usize = 20;
pub const MAX_BATCH_LIST_LIMIT: usize = 100;

#[derive(Clone)]
pub struct RecommendationReader {
    store: Arc<dyn RecommendationStore>,
}

impl RecommendationReader {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }

    /// The user's items from the latest successful batch, optionally of one algorithm.
    /// No batch yet is an empty result, not an error.
    pub async fn get_recommendations(
        &self,
        user_id: UserId,
        algorithm: Option<Algorithm>,
    ) -> Result<Recommendations> {
        let Some(batch) = self.store.fetch_latest_successful_batch(algorithm).await? else {
            debug!(user_id, ?algorithm, "No successful batch yet");
            return Ok(Recommendations::empty());
        };

        let items = self
            .store
            .fetch_batch_items_for_user(batch.batch_id, user_id)
            .await?;

        Ok(Recommendations {
            batch: Some(batch),
            items,
        })
    }

    /// Most recent batches of any status; `limit` defaults to 20 and is capped at 100
    pub async fn list_batches(&self, limit: Option<usize>) -> Result<Vec<RecommendationBatch>> {
        let limit = limit
            .unwrap_or(DEFAULT_BATCH_LIST_LIMIT)
            .clamp(1, MAX_BATCH_LIST_LIMIT);
        self.store.list_batches(limit).await
    }
}
