//! User preference vectors and the per-batch rating corpus
//!
//! Preference vectors are built from explicit ratings only and rebuilt on every
//! batch run. The corpus is loaded once per batch and shared read-only across
//! the per-user scoring tasks.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::model::{MovieId, RatingEvent, UserId};

/// Sparse movie → score mapping for one user.
///
/// Entries are kept sorted by movie id with no duplicates, and the squared L2
/// norm is computed once at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferenceVector {
    entries: Vec<(MovieId, f64)>,
    squared_norm: f64,
}

impl UserPreferenceVector {
    /// Build from (movie, score) pairs; a later pair for the same movie replaces an earlier one
    pub fn from_scores(scores: impl IntoIterator<Item = (MovieId, f64)>) -> Self {
        let deduped: BTreeMap<MovieId, f64> = scores.into_iter().collect();
        let entries: Vec<(MovieId, f64)> = deduped.into_iter().collect();
        let squared_norm = entries.iter().map(|(_, s)| s * s).sum();
        Self {
            entries,
            squared_norm,
        }
    }

    pub fn get(&self, movie_id: MovieId) -> Option<f64> {
        self.entries
            .binary_search_by_key(&movie_id, |(m, _)| *m)
            .ok()
            .map(|idx| self.entries[idx].1)
    }

    pub fn contains(&self, movie_id: MovieId) -> bool {
        self.get(movie_id).is_some()
    }

    /// Entries in ascending movie id order
    pub fn iter(&self) -> impl Iterator<Item = (MovieId, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn squared_norm(&self) -> f64 {
        self.squared_norm
    }
}

/// Every rated user's preference vector, loaded once per batch
#[derive(Debug, Clone, Default)]
pub struct RatingCorpus {
    vectors: HashMap<UserId, UserPreferenceVector>,
    /// Rated users in ascending id order, for deterministic iteration
    users: Vec<UserId>,
}

impl RatingCorpus {
    /// Group ratings by user; duplicate (user, movie) rows resolve to the last one seen
    pub fn from_ratings(ratings: impl IntoIterator<Item = RatingEvent>) -> Self {
        let mut grouped: HashMap<UserId, Vec<(MovieId, f64)>> = HashMap::new();
        for rating in ratings {
            grouped
                .entry(rating.user_id)
                .or_default()
                .push((rating.movie_id, rating.score));
        }

        let vectors: HashMap<UserId, UserPreferenceVector> = grouped
            .into_iter()
            .map(|(user_id, scores)| (user_id, UserPreferenceVector::from_scores(scores)))
            .collect();

        let mut users: Vec<UserId> = vectors.keys().copied().collect();
        users.sort_unstable();

        Self { vectors, users }
    }

    pub fn vector(&self, user_id: UserId) -> Option<&UserPreferenceVector> {
        self.vectors.get(&user_id)
    }

    /// Rated users with their vectors, ascending by user id
    pub fn iter(&self) -> impl Iterator<Item = (UserId, &UserPreferenceVector)> + '_ {
        self.users
            .iter()
            .filter_map(move |u| self.vectors.get(u).map(|v| (*u, v)))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(user_id: UserId, movie_id: MovieId, score: f64) -> RatingEvent {
        RatingEvent {
            user_id,
            movie_id,
            score,
        }
    }

    #[test]
    fn test_vector_keeps_latest_score_per_movie() {
        let v = UserPreferenceVector::from_scores([(3, 2.0), (1, 4.0), (3, 5.0)]);
        assert_eq!(v.len(), 2);
        assert_eq!(v.get(3), Some(5.0));
        assert_eq!(v.iter().map(|(m, _)| m).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(v.squared_norm(), 41.0);
    }

    #[test]
    fn test_corpus_groups_by_user() {
        let corpus = RatingCorpus::from_ratings(vec![
            rating(2, 10, 4.0),
            rating(1, 10, 5.0),
            rating(1, 11, 3.0),
        ]);

        assert_eq!(corpus.user_count(), 2);
        assert_eq!(corpus.iter().map(|(u, _)| u).collect::<Vec<_>>(), vec![1, 2]);
        assert!(corpus.vector(1).map(|v| v.contains(11)).unwrap_or(false));
        assert!(corpus.vector(3).is_none());
    }

    #[test]
    fn test_empty_corpus() {
        let corpus = RatingCorpus::from_ratings(Vec::new());
        assert!(corpus.is_empty());
        assert_eq!(corpus.iter().count(), 0);
    }
}
