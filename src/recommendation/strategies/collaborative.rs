//! User-based collaborative filtering
//!
//! For a target user U, every other rated user O with positive cosine
//! similarity votes for the movies U has not rated:
//!
//! ```text
//! predicted(m) = Σ sim(U, O) · rating(O, m) / Σ sim(U, O)
//! ```
//!
//! Scoring is CPU-bound, so it runs on the rayon worker pool inside
//! `spawn_blocking` against a read-only snapshot of the corpus.

use async_trait::async_trait;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{top_n_by_score, with_reason, RecommendationStrategy, StrategyContext};
use crate::error::Result;
use crate::recommendation::algorithm::Algorithm;
use crate::recommendation::metrics::PerformanceTimer;
use crate::recommendation::model::{
    Candidate, CandidateMap, MovieId, UserId, REASON_SIMILAR_USERS,
};
use crate::recommendation::preferences::RatingCorpus;
use crate::recommendation::similarity::cosine_similarity;

pub struct CollaborativeStrategy;

/// Predicted scores for one user, top `top_n` first. Empty when the user has no ratings.
pub fn predict_for_user(corpus: &RatingCorpus, user_id: UserId, top_n: usize) -> Vec<Candidate> {
    let Some(target) = corpus.vector(user_id) else {
        return Vec::new();
    };
    if target.is_empty() {
        return Vec::new();
    }

    // movie → (Σ sim·rating, Σ sim)
    let mut sums: HashMap<MovieId, (f64, f64)> = HashMap::new();
    for (other_id, other) in corpus.iter() {
        if other_id == user_id {
            continue;
        }
        let sim = cosine_similarity(target, other);
        if sim <= 0.0 {
            continue;
        }
        for (movie_id, rating) in other.iter() {
            if target.contains(movie_id) {
                continue;
            }
            let entry = sums.entry(movie_id).or_insert((0.0, 0.0));
            entry.0 += sim * rating;
            entry.1 += sim;
        }
    }

    let predicted: HashMap<MovieId, f64> = sums
        .into_iter()
        .filter(|(_, (_, weight))| *weight != 0.0)
        .map(|(movie_id, (score, weight))| (movie_id, score / weight))
        .collect();

    with_reason(top_n_by_score(predicted, top_n), REASON_SIMILAR_USERS)
}

/// Predictions for every target user, computed in parallel on `workers`
#[instrument(skip(corpus, targets, workers), fields(targets = targets.len()))]
pub async fn recommend(
    corpus: Arc<RatingCorpus>,
    targets: Vec<UserId>,
    top_n: usize,
    workers: Arc<rayon::ThreadPool>,
) -> Result<CandidateMap> {
    let result = tokio::task::spawn_blocking(move || {
        let _timer = PerformanceTimer::new("collaborative scoring");
        workers.install(|| {
            targets
                .par_iter()
                .map(|&user_id| (user_id, predict_for_user(&corpus, user_id, top_n)))
                .filter(|(_, candidates)| !candidates.is_empty())
                .collect::<CandidateMap>()
        })
    })
    .await?;

    debug!(users_with_predictions = result.len(), "Collaborative scoring done");
    Ok(result)
}

#[async_trait]
impl RecommendationStrategy for CollaborativeStrategy {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Collaborative
    }

    async fn generate(&self, ctx: &StrategyContext) -> Result<CandidateMap> {
        let corpus = Arc::new(RatingCorpus::from_ratings(
            ctx.store.fetch_all_ratings().await?,
        ));
        recommend(
            corpus,
            ctx.users.clone(),
            ctx.params.top_n,
            Arc::clone(&ctx.workers),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommendation::model::RatingEvent;

    fn corpus(rows: &[(UserId, MovieId, f64)]) -> RatingCorpus {
        RatingCorpus::from_ratings(rows.iter().map(|&(user_id, movie_id, score)| RatingEvent {
            user_id,
            movie_id,
            score,
        }))
    }

    #[test]
    fn test_similar_user_movie_is_recommended() {
        // U1 = {M1:5, M2:3}, U2 = {M1:5, M3:4}
        let corpus = corpus(&[(1, 1, 5.0), (1, 2, 3.0), (2, 1, 5.0), (2, 3, 4.0)]);

        let u1 = predict_for_user(&corpus, 1, 10);
        assert_eq!(u1.len(), 1);
        assert_eq!(u1[0].movie_id, 3);
        assert!((u1[0].score - 4.0).abs() < 1e-12);
        assert_eq!(u1[0].reason, REASON_SIMILAR_USERS);

        let u2 = predict_for_user(&corpus, 2, 10);
        assert_eq!(u2.iter().map(|c| c.movie_id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_prediction_is_similarity_weighted_average() {
        // U1 overlaps with U2 and U3 on M1 only; both rated M9
        let corpus = corpus(&[
            (1, 1, 4.0),
            (2, 1, 4.0),
            (2, 9, 5.0),
            (3, 1, 2.0),
            (3, 2, 4.0),
            (3, 9, 1.0),
        ]);
        let sim2 = 16.0 / (4.0 * 41.0_f64.sqrt());
        let sim3 = 8.0 / (4.0 * 21.0_f64.sqrt());
        let expected_m9 = (sim2 * 5.0 + sim3 * 1.0) / (sim2 + sim3);

        let predicted = predict_for_user(&corpus, 1, 10);
        let m9 = predicted.iter().find(|c| c.movie_id == 9).unwrap();
        assert!((m9.score - expected_m9).abs() < 1e-12);
        let m2 = predicted.iter().find(|c| c.movie_id == 2).unwrap();
        assert!((m2.score - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_unrated_or_isolated_user_gets_nothing() {
        let corpus = corpus(&[(1, 1, 5.0), (2, 2, 4.0)]);
        assert!(predict_for_user(&corpus, 1, 10).is_empty());
        assert!(predict_for_user(&corpus, 42, 10).is_empty());
    }

    #[tokio::test]
    async fn test_recommend_on_worker_pool() {
        let corpus = Arc::new(corpus(&[(1, 1, 5.0), (1, 2, 3.0), (2, 1, 5.0), (2, 3, 4.0)]));
        let workers = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(2)
                .build()
                .unwrap(),
        );

        let result = recommend(corpus, vec![1, 2, 3], 10, workers).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[&1][0].movie_id, 3);
        assert!(!result.contains_key(&3));
    }
}
