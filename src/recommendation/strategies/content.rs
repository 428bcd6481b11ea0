//! Content-based strategy: unseen active movies from the user's favourite genres

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use super::{RecommendationStrategy, StrategyContext};
use crate::error::{Error, Result};
use crate::recommendation::algorithm::Algorithm;
use crate::recommendation::model::{Candidate, CandidateMap, UserId, REASON_SIMILAR_GENRES};
use crate::recommendation::store::{CandidateExclusions, RecommendationStore};

pub struct ContentStrategy;

/// Content candidates for one user; empty when the user has no genre signal
#[instrument(skip(store, exclusions))]
pub async fn content_candidates(
    store: &dyn RecommendationStore,
    user_id: UserId,
    top_genres: usize,
    exclusions: CandidateExclusions,
    top_n: usize,
) -> Result<Vec<Candidate>> {
    let genres = store.fetch_user_top_genres(user_id, top_genres).await?;
    if genres.is_empty() {
        debug!(user_id, "No genre signal");
        return Ok(Vec::new());
    }

    let movies = store
        .fetch_genre_candidate_movies(user_id, &genres, exclusions, top_n)
        .await?;

    Ok(movies
        .into_iter()
        .map(|movie_id| Candidate::new(movie_id, 1.0, REASON_SIMILAR_GENRES))
        .collect())
}

/// Content candidates for every user in the context, with bounded concurrency.
///
/// The first failing lookup aborts the remaining ones.
pub async fn content_for_users(ctx: &StrategyContext) -> Result<CandidateMap> {
    let semaphore = Arc::new(Semaphore::new(ctx.content_concurrency.max(1)));
    let mut set = JoinSet::new();

    for &user_id in &ctx.users {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(Error::internal)?;
        let store = Arc::clone(&ctx.store);
        let (top_genres, exclusions, top_n) =
            (ctx.top_genres, ctx.exclusions, ctx.params.top_n);

        set.spawn(async move {
            let _permit = permit;
            let result =
                content_candidates(store.as_ref(), user_id, top_genres, exclusions, top_n).await;
            (user_id, result)
        });
    }

    let mut candidates = CandidateMap::with_capacity(ctx.users.len());
    while let Some(joined) = set.join_next().await {
        let (user_id, result) = joined?;
        match result {
            Ok(list) => {
                candidates.insert(user_id, list);
            }
            Err(e) => {
                set.abort_all();
                return Err(e);
            }
        }
    }

    Ok(candidates)
}

#[async_trait]
impl RecommendationStrategy for ContentStrategy {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Content
    }

    async fn generate(&self, ctx: &StrategyContext) -> Result<CandidateMap> {
        content_for_users(ctx).await
    }
}
