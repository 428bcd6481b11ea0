//! Popularity ("hot") strategy
//!
//! One shared list: movies with the most watch events inside the window, or the
//! most ratings overall when nobody watched anything recently.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{RecommendationStrategy, StrategyContext};
use crate::error::Result;
use crate::recommendation::algorithm::Algorithm;
use crate::recommendation::model::{Candidate, CandidateMap};
use crate::recommendation::store::RecommendationStore;

pub struct PopularityStrategy;

/// Ranked hot list of up to `top_n` movies, scored by event count
#[instrument(skip(store))]
pub async fn hot_movies(
    store: &dyn RecommendationStore,
    window_days: u32,
    top_n: usize,
) -> Result<Vec<Candidate>> {
    let mut counts = store.fetch_recent_watch_counts(window_days, top_n).await?;
    if counts.is_empty() {
        debug!("No watches in window, falling back to rating counts");
        counts = store.fetch_rating_counts(top_n).await?;
    }

    let reason = format!("Hot in last {} days", window_days);
    Ok(counts
        .into_iter()
        .map(|row| Candidate::new(row.movie_id, row.count as f64, reason.as_str()))
        .collect())
}

#[async_trait]
impl RecommendationStrategy for PopularityStrategy {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Popularity
    }

    async fn generate(&self, ctx: &StrategyContext) -> Result<CandidateMap> {
        let hot = hot_movies(ctx.store.as_ref(), ctx.params.window_days, ctx.params.top_n).await?;
        Ok(ctx
            .users
            .iter()
            .map(|user_id| (*user_id, hot.clone()))
            .collect())
    }
}
