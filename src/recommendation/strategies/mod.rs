//! Candidate generation strategies
//!
//! Every strategy turns the batch context into a [`CandidateMap`]: for each
//! eligible user, at most `top_n` unique movies already in rank order. Users
//! with no signal map to an empty list (or are absent), never to an error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::algorithm::Algorithm;
use super::model::{BatchParams, Candidate, CandidateMap, MovieId, UserId};
use super::store::{CandidateExclusions, RecommendationStore};
use crate::error::Result;

pub mod collaborative;
pub mod content;
pub mod hybrid;
pub mod popularity;

pub use collaborative::CollaborativeStrategy;
pub use content::ContentStrategy;
pub use hybrid::HybridStrategy;
pub use popularity::PopularityStrategy;

/// Everything a strategy needs for one batch run
#[derive(Clone)]
pub struct StrategyContext {
    pub store: Arc<dyn RecommendationStore>,
    /// Eligible users, ascending by id
    pub users: Vec<UserId>,
    pub params: BatchParams,
    /// Genres considered per user by the content strategy
    pub top_genres: usize,
    /// Maximum in-flight per-user store lookups
    pub content_concurrency: usize,
    pub exclusions: CandidateExclusions,
    /// CPU pool for similarity scoring
    pub workers: Arc<rayon::ThreadPool>,
}

#[async_trait]
pub trait RecommendationStrategy: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    async fn generate(&self, ctx: &StrategyContext) -> Result<CandidateMap>;
}

/// Strategy implementing `algorithm`
pub fn strategy_for(algorithm: Algorithm) -> Box<dyn RecommendationStrategy> {
    match algorithm {
        Algorithm::Popularity => Box::new(PopularityStrategy),
        Algorithm::Content => Box::new(ContentStrategy),
        Algorithm::Collaborative => Box::new(CollaborativeStrategy),
        Algorithm::Hybrid => Box::new(HybridStrategy),
    }
}

/// Highest `n` scores; equal scores put the larger movie id first
pub fn top_n_by_score(scores: HashMap<MovieId, f64>, n: usize) -> Vec<(MovieId, f64)> {
    let mut ranked: Vec<(MovieId, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
    ranked.truncate(n);
    ranked
}

/// Attach one reason to a ranked score list
pub(crate) fn with_reason(ranked: Vec<(MovieId, f64)>, reason: &str) -> Vec<Candidate> {
    ranked
        .into_iter()
        .map(|(movie_id, score)| Candidate::new(movie_id, score, reason))
        .collect()
}
