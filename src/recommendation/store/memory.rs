//! In-process store
//!
//! Holds the catalog and batch relations in memory with the same ordering and
//! constraint rules as the PostgreSQL schema. Used by the integration tests and
//! for running the engine without a database.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

use super::{CandidateExclusions, RecommendationStore};
use crate::error::{Error, Result};
use crate::recommendation::algorithm::Algorithm;
use crate::recommendation::model::{
    BatchId, BatchParams, BatchStatus, GenreId, MovieCount, MovieId, NewRecommendation,
    RatingEvent, RecommendationBatch, RecommendationItem, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Banned,
}

#[derive(Debug, Clone)]
struct RatingRow {
    user_id: UserId,
    movie_id: MovieId,
    score: f64,
}

#[derive(Debug, Clone)]
struct WatchRow {
    user_id: UserId,
    movie_id: MovieId,
    watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MovieRow {
    active: bool,
    title: Option<String>,
    poster_url: Option<String>,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, (UserRole, UserStatus)>,
    movies: BTreeMap<MovieId, MovieRow>,
    movie_genres: Vec<(MovieId, GenreId)>,
    /// Insertion order stands in for `rating_id`
    ratings: Vec<RatingRow>,
    /// Insertion order stands in for `watch_id`
    watches: Vec<WatchRow>,
    batches: Vec<RecommendationBatch>,
    items: Vec<RecommendationItem>,
    next_batch_id: BatchId,
}

impl Tables {
    fn genres_of(&self, movie_id: MovieId) -> impl Iterator<Item = GenreId> + '_ {
        self.movie_genres
            .iter()
            .filter(move |(m, _)| *m == movie_id)
            .map(|(_, g)| *g)
    }

    fn allocate_batch(
        &mut self,
        algorithm: Algorithm,
        params: &BatchParams,
        status: BatchStatus,
    ) -> Result<RecommendationBatch> {
        self.next_batch_id += 1;
        let batch = RecommendationBatch {
            batch_id: self.next_batch_id,
            algorithm,
            params: Some(serde_json::to_value(params)?),
            status,
            generated_at: Utc::now(),
        };
        self.batches.push(batch.clone());
        Ok(batch)
    }

    /// Batches newest first: generated_at desc, then batch_id desc
    fn batches_newest_first(&self) -> Vec<&RecommendationBatch> {
        let mut batches: Vec<&RecommendationBatch> = self.batches.iter().collect();
        batches.sort_by(|a, b| {
            b.generated_at
                .cmp(&a.generated_at)
                .then(b.batch_id.cmp(&a.batch_id))
        });
        batches
    }
}

/// Count per genre, ordered by count desc, first appearance asc, genre id asc
fn rank_genres(genres: impl Iterator<Item = (usize, GenreId)>, limit: usize) -> Vec<GenreId> {
    let mut stats: HashMap<GenreId, (i64, usize)> = HashMap::new();
    for (position, genre_id) in genres {
        let entry = stats.entry(genre_id).or_insert((0, position));
        entry.0 += 1;
        entry.1 = entry.1.min(position);
    }

    let mut ranked: Vec<(GenreId, i64, usize)> =
        stats.into_iter().map(|(g, (c, first))| (g, c, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(g, _, _)| g).collect()
}

/// Count desc, then movie id desc
fn rank_counts(counts: HashMap<MovieId, i64>, limit: usize) -> Vec<MovieCount> {
    let mut rows: Vec<MovieCount> = counts
        .into_iter()
        .map(|(movie_id, count)| MovieCount { movie_id, count })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then(b.movie_id.cmp(&a.movie_id)));
    rows.truncate(limit);
    rows
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user_id: UserId, role: UserRole, status: UserStatus) {
        self.tables.write().await.users.insert(user_id, (role, status));
    }

    pub async fn insert_movie(&self, movie_id: MovieId, active: bool) {
        self.tables
            .write()
            .await
            .movies
            .entry(movie_id)
            .or_default()
            .active = active;
    }

    /// Set display fields; an unknown movie is inserted as active
    pub async fn describe_movie(
        &self,
        movie_id: MovieId,
        title: impl Into<String>,
        poster_url: Option<String>,
    ) {
        let mut tables = self.tables.write().await;
        let movie = tables.movies.entry(movie_id).or_insert_with(|| MovieRow {
            active: true,
            ..MovieRow::default()
        });
        movie.title = Some(title.into());
        movie.poster_url = poster_url;
    }

    pub async fn insert_movie_genre(&self, movie_id: MovieId, genre_id: GenreId) {
        let mut tables = self.tables.write().await;
        if !tables.movie_genres.contains(&(movie_id, genre_id)) {
            tables.movie_genres.push((movie_id, genre_id));
        }
    }

    /// Insert or update in place, keeping the original row position
    pub async fn upsert_rating(&self, user_id: UserId, movie_id: MovieId, score: f64) {
        let mut tables = self.tables.write().await;
        match tables
            .ratings
            .iter_mut()
            .find(|r| r.user_id == user_id && r.movie_id == movie_id)
        {
            Some(existing) => existing.score = score,
            None => tables.ratings.push(RatingRow {
                user_id,
                movie_id,
                score,
            }),
        }
    }

    pub async fn record_watch(&self, user_id: UserId, movie_id: MovieId, watched_at: DateTime<Utc>) {
        self.tables.write().await.watches.push(WatchRow {
            user_id,
            movie_id,
            watched_at,
        });
    }

    /// Number of stored batch records of any status
    pub async fn batch_count(&self) -> usize {
        self.tables.read().await.batches.len()
    }

    /// Every stored item of a batch, ordered by user then rank
    pub async fn batch_items(&self, batch_id: BatchId) -> Vec<RecommendationItem> {
        let tables = self.tables.read().await;
        let mut items: Vec<RecommendationItem> = tables
            .items
            .iter()
            .filter(|i| i.batch_id == batch_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.user_id.cmp(&b.user_id).then(a.rank.cmp(&b.rank)));
        items
    }
}

#[async_trait]
impl RecommendationStore for MemoryStore {
    async fn fetch_active_user_ids(&self) -> Result<Vec<UserId>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .filter(|(_, (role, status))| *role == UserRole::User && *status == UserStatus::Active)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn fetch_all_ratings(&self) -> Result<Vec<RatingEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ratings
            .iter()
            .map(|r| RatingEvent {
                user_id: r.user_id,
                movie_id: r.movie_id,
                score: r.score,
            })
            .collect())
    }

    async fn fetch_recent_watch_counts(
        &self,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<MovieCount>> {
        let tables = self.tables.read().await;
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(window_days));

        let mut counts: HashMap<MovieId, i64> = HashMap::new();
        for watch in tables.watches.iter().filter(|w| w.watched_at >= cutoff) {
            *counts.entry(watch.movie_id).or_default() += 1;
        }
        Ok(rank_counts(counts, limit))
    }

    async fn fetch_rating_counts(&self, limit: usize) -> Result<Vec<MovieCount>> {
        let tables = self.tables.read().await;
        let mut counts: HashMap<MovieId, i64> = HashMap::new();
        for rating in &tables.ratings {
            *counts.entry(rating.movie_id).or_default() += 1;
        }
        Ok(rank_counts(counts, limit))
    }

    async fn fetch_user_top_genres(&self, user_id: UserId, limit: usize) -> Result<Vec<GenreId>> {
        let tables = self.tables.read().await;

        let from_ratings = rank_genres(
            tables
                .ratings
                .iter()
                .enumerate()
                .filter(|(_, r)| r.user_id == user_id)
                .flat_map(|(pos, r)| tables.genres_of(r.movie_id).map(move |g| (pos, g))),
            limit,
        );
        if !from_ratings.is_empty() {
            return Ok(from_ratings);
        }

        Ok(rank_genres(
            tables
                .watches
                .iter()
                .enumerate()
                .filter(|(_, w)| w.user_id == user_id)
                .flat_map(|(pos, w)| tables.genres_of(w.movie_id).map(move |g| (pos, g))),
            limit,
        ))
    }

    async fn fetch_genre_candidate_movies(
        &self,
        user_id: UserId,
        genre_ids: &[GenreId],
        exclusions: CandidateExclusions,
        limit: usize,
    ) -> Result<Vec<MovieId>> {
        let tables = self.tables.read().await;
        let wanted: HashSet<GenreId> = genre_ids.iter().copied().collect();

        let mut excluded: HashSet<MovieId> = HashSet::new();
        if exclusions.rated {
            excluded.extend(
                tables
                    .ratings
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .map(|r| r.movie_id),
            );
        }
        if exclusions.watched {
            excluded.extend(
                tables
                    .watches
                    .iter()
                    .filter(|w| w.user_id == user_id)
                    .map(|w| w.movie_id),
            );
        }

        Ok(tables
            .movies
            .iter()
            .rev()
            .filter(|(_, movie)| movie.active)
            .map(|(id, _)| *id)
            .filter(|id| !excluded.contains(id))
            .filter(|id| tables.genres_of(*id).any(|g| wanted.contains(&g)))
            .take(limit)
            .collect())
    }

    async fn create_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        status: BatchStatus,
    ) -> Result<BatchId> {
        let mut tables = self.tables.write().await;
        Ok(tables.allocate_batch(algorithm, params, status)?.batch_id)
    }

    async fn commit_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        items: &[NewRecommendation],
    ) -> Result<RecommendationBatch> {
        // Same constraints as the recommendations table; checked before anything is written
        let mut ranks = HashSet::new();
        let mut movies = HashSet::new();
        for item in items {
            if item.rank < 1 {
                return Err(Error::ConstraintViolation {
                    message: format!("rank {} for user {} is below 1", item.rank, item.user_id)
                        .into(),
                });
            }
            if !ranks.insert((item.user_id, item.rank)) {
                return Err(Error::ConstraintViolation {
                    message: format!("duplicate rank {} for user {}", item.rank, item.user_id)
                        .into(),
                });
            }
            if !movies.insert((item.user_id, item.movie_id)) {
                return Err(Error::ConstraintViolation {
                    message: format!(
                        "movie {} recommended twice to user {}",
                        item.movie_id, item.user_id
                    )
                    .into(),
                });
            }
        }

        let mut tables = self.tables.write().await;
        let batch = tables.allocate_batch(algorithm, params, BatchStatus::Success)?;
        tables
            .items
            .extend(items.iter().map(|item| RecommendationItem {
                batch_id: batch.batch_id,
                user_id: item.user_id,
                movie_id: item.movie_id,
                rank: item.rank,
                score: item.score,
                reason: Some(item.reason.clone()),
                title: None,
                poster_url: None,
            }));
        Ok(batch)
    }

    async fn fetch_latest_successful_batch(
        &self,
        algorithm: Option<Algorithm>,
    ) -> Result<Option<RecommendationBatch>> {
        let tables = self.tables.read().await;
        Ok(tables
            .batches_newest_first()
            .into_iter()
            .find(|b| {
                b.status == BatchStatus::Success && algorithm.map_or(true, |a| b.algorithm == a)
            })
            .cloned())
    }

    async fn fetch_batch_items_for_user(
        &self,
        batch_id: BatchId,
        user_id: UserId,
    ) -> Result<Vec<RecommendationItem>> {
        let tables = self.tables.read().await;
        let mut items: Vec<RecommendationItem> = tables
            .items
            .iter()
            .filter(|i| i.batch_id == batch_id && i.user_id == user_id)
            .map(|i| {
                let movie = tables.movies.get(&i.movie_id);
                RecommendationItem {
                    title: movie.and_then(|m| m.title.clone()),
                    poster_url: movie.and_then(|m| m.poster_url.clone()),
                    ..i.clone()
                }
            })
            .collect();
        items.sort_by_key(|i| i.rank);
        Ok(items)
    }

    async fn list_batches(&self, limit: usize) -> Result<Vec<RecommendationBatch>> {
        let tables = self.tables.read().await;
        Ok(tables
            .batches_newest_first()
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }
}
