//! Hybrid strategy: weighted sum of the popularity, content and collaborative scores

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::collaborative;
use super::content::content_for_users;
use super::popularity::hot_movies;
use super::{top_n_by_score, with_reason, RecommendationStrategy, StrategyContext};
use crate::error::Result;
use crate::recommendation::algorithm::Algorithm;
use crate::recommendation::model::{
    Candidate, CandidateMap, HybridWeights, MovieId, REASON_HYBRID,
};
use crate::recommendation::preferences::RatingCorpus;

pub struct HybridStrategy;

/// Combine one user's three candidate lists into a ranked hybrid list
pub fn blend(
    hot: &[Candidate],
    content: &[Candidate],
    collaborative: &[Candidate],
    weights: &HybridWeights,
    top_n: usize,
) -> Vec<Candidate> {
    let mut scores: HashMap<MovieId, f64> = HashMap::new();
    let sources = [
        (hot, weights.popularity),
        (content, weights.content),
        (collaborative, weights.collaborative),
    ];
    for (candidates, weight) in sources {
        for candidate in candidates {
            *scores.entry(candidate.movie_id).or_insert(0.0) += candidate.score * weight;
        }
    }

    with_reason(top_n_by_score(scores, top_n), REASON_HYBRID)
}

#[async_trait]
impl RecommendationStrategy for HybridStrategy {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Hybrid
    }

    async fn generate(&self, ctx: &StrategyContext) -> Result<CandidateMap> {
        let weights = ctx.params.weights.unwrap_or_default();
        let top_n = ctx.params.top_n;

        let hot = hot_movies(ctx.store.as_ref(), ctx.params.window_days, top_n).await?;

        let corpus = Arc::new(RatingCorpus::from_ratings(
            ctx.store.fetch_all_ratings().await?,
        ));
        let cf = collaborative::recommend(
            corpus,
            ctx.users.clone(),
            top_n,
            Arc::clone(&ctx.workers),
        )
        .await?;

        let content = content_for_users(ctx).await?;

        Ok(ctx
            .users
            .iter()
            .map(|user_id| {
                let blended = blend(
                    &hot,
                    content.get(user_id).map(Vec::as_slice).unwrap_or_default(),
                    cf.get(user_id).map(Vec::as_slice).unwrap_or_default(),
                    &weights,
                    top_n,
                );
                (*user_id, blended)
            })
            .collect())
    }
}
