//! PostgreSQL-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use super::{CandidateExclusions, RecommendationStore};
use crate::database::{self, Transaction};
use crate::error::{Error, Result};
use crate::recommendation::algorithm::Algorithm;
use crate::recommendation::model::{
    BatchId, BatchParams, BatchStatus, GenreId, MovieCount, MovieId, NewRecommendation,
    RatingEvent, RecommendationBatch, RecommendationItem, UserId,
};

/// Rows per multi-row INSERT; six binds per row stays under the 65535 bind limit
const INSERT_CHUNK_ROWS: usize = 5_000;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row for `recommendation_batches`
#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    batch_id: i64,
    algorithm: String,
    params_json: Option<serde_json::Value>,
    status: String,
    generated_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for RecommendationBatch {
    type Error = Error;

    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(Self {
            batch_id: row.batch_id,
            algorithm: row.algorithm.parse()?,
            params: row.params_json,
            status: row.status.parse()?,
            generated_at: row.generated_at,
        })
    }
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl RecommendationStore for PgStore {
    async fn fetch_active_user_ids(&self) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT user_id FROM users
            WHERE status = 'active' AND role = 'user'
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn fetch_all_ratings(&self) -> Result<Vec<RatingEvent>> {
        let ratings = sqlx::query_as::<_, RatingEvent>(
            "SELECT user_id, movie_id, score FROM ratings ORDER BY rating_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ratings)
    }

    async fn fetch_recent_watch_counts(
        &self,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<MovieCount>> {
        let days = i32::try_from(window_days).unwrap_or(i32::MAX);
        let rows = sqlx::query_as::<_, MovieCount>(
            r#"
            SELECT movie_id, COUNT(*) AS count
            FROM watch_history
            WHERE watched_at >= NOW() - make_interval(days => $1)
            GROUP BY movie_id
            ORDER BY count DESC, movie_id DESC
            LIMIT $2
            "#,
        )
        .bind(days)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_rating_counts(&self, limit: usize) -> Result<Vec<MovieCount>> {
        let rows = sqlx::query_as::<_, MovieCount>(
            r#"
            SELECT movie_id, COUNT(*) AS count
            FROM ratings
            GROUP BY movie_id
            ORDER BY count DESC, movie_id DESC
            LIMIT $1
            "#,
        )
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_user_top_genres(&self, user_id: UserId, limit: usize) -> Result<Vec<GenreId>> {
        let from_ratings = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT mg.genre_id
            FROM ratings r
            JOIN movie_genres mg ON mg.movie_id = r.movie_id
            WHERE r.user_id = $1
            GROUP BY mg.genre_id
            ORDER BY COUNT(*) DESC, MIN(r.rating_id) ASC, mg.genre_id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        if !from_ratings.is_empty() {
            return Ok(from_ratings);
        }

        let from_watches = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT mg.genre_id
            FROM watch_history w
            JOIN movie_genres mg ON mg.movie_id = w.movie_id
            WHERE w.user_id = $1
            GROUP BY mg.genre_id
            ORDER BY COUNT(*) DESC, MIN(w.watch_id) ASC, mg.genre_id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(from_watches)
    }

    async fn fetch_genre_candidate_movies(
        &self,
        user_id: UserId,
        genre_ids: &[GenreId],
        exclusions: CandidateExclusions,
        limit: usize,
    ) -> Result<Vec<MovieId>> {
        if genre_ids.is_empty() {
            return Ok(Vec::new());
        }

        let movies = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT m.movie_id
            FROM movies m
            JOIN movie_genres mg ON mg.movie_id = m.movie_id
            WHERE m.status = 'active'
              AND mg.genre_id = ANY($1)
              AND (NOT $3 OR NOT EXISTS (
                    SELECT 1 FROM ratings r WHERE r.user_id = $2 AND r.movie_id = m.movie_id))
              AND (NOT $4 OR NOT EXISTS (
                    SELECT 1 FROM watch_history w WHERE w.user_id = $2 AND w.movie_id = m.movie_id))
            ORDER BY m.movie_id DESC
            LIMIT $5
            "#,
        )
        .bind(genre_ids)
        .bind(user_id)
        .bind(exclusions.rated)
        .bind(exclusions.watched)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(movies)
    }

    #[instrument(skip(self, params))]
    async fn create_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        status: BatchStatus,
    ) -> Result<BatchId> {
        let params_json = serde_json::to_value(params)?;
        let batch_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO recommendation_batches (algorithm, params_json, status)
            VALUES ($1, $2, $3)
            RETURNING batch_id
            "#,
        )
        .bind(algorithm.as_str())
        .bind(&params_json)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(batch_id)
    }

    #[instrument(skip(self, params, items), fields(items = items.len()))]
    async fn commit_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        items: &[NewRecommendation],
    ) -> Result<RecommendationBatch> {
        let params_json = serde_json::to_value(params)?;
        let mut tx = Transaction::begin(&self.pool).await?;

        // An error here drops `tx`, rolling back the pending row and any items
        let row = write_batch(&mut tx, algorithm, &params_json, items).await?;
        tx.commit().await?;
        debug!(batch_id = row.batch_id, "Batch committed");
        row.try_into()
    }

    async fn fetch_latest_successful_batch(
        &self,
        algorithm: Option<Algorithm>,
    ) -> Result<Option<RecommendationBatch>> {
        let row = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT batch_id, algorithm, params_json, status, generated_at
            FROM recommendation_batches
            WHERE status = 'success'
              AND ($1::text IS NULL OR algorithm = $1)
            ORDER BY generated_at DESC, batch_id DESC
            LIMIT 1
            "#,
        )
        .bind(algorithm.map(|a| a.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecommendationBatch::try_from).transpose()
    }

    async fn fetch_batch_items_for_user(
        &self,
        batch_id: BatchId,
        user_id: UserId,
    ) -> Result<Vec<RecommendationItem>> {
        let items = sqlx::query_as::<_, RecommendationItem>(
            r#"
            SELECT r.batch_id, r.user_id, r.movie_id, r.rank, r.score, r.reason,
                   m.title, m.poster_url
            FROM recommendations r
            LEFT JOIN movies m ON m.movie_id = r.movie_id
            WHERE r.batch_id = $1 AND r.user_id = $2
            ORDER BY r.rank ASC
            "#,
        )
        .bind(batch_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn list_batches(&self, limit: usize) -> Result<Vec<RecommendationBatch>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT batch_id, algorithm, params_json, status, generated_at
            FROM recommendation_batches
            WHERE status <> 'pending'
            ORDER BY generated_at DESC, batch_id DESC
            LIMIT $1
            "#,
        )
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecommendationBatch::try_from).collect()
    }

    async fn ping(&self) -> Result<()> {
        database::health_check(&self.pool).await
    }
}

/// pending → items → success, all inside the caller's transaction
async fn write_batch(
    tx: &mut Transaction<'_>,
    algorithm: Algorithm,
    params_json: &serde_json::Value,
    items: &[NewRecommendation],
) -> Result<BatchRow> {
    let batch_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO recommendation_batches (algorithm, params_json, status)
        VALUES ($1, $2, 'pending')
        RETURNING batch_id
        "#,
    )
    .bind(algorithm.as_str())
    .bind(params_json)
    .fetch_one(tx.conn())
    .await?;

    insert_recommendations(tx, batch_id, items).await?;

    let row = sqlx::query_as::<_, BatchRow>(
        r#"
        UPDATE recommendation_batches
        SET status = 'success'
        WHERE batch_id = $1
        RETURNING batch_id, algorithm, params_json, status, generated_at
        "#,
    )
    .bind(batch_id)
    .fetch_one(tx.conn())
    .await?;

    Ok(row)
}

async fn insert_recommendations(
    tx: &mut Transaction<'_>,
    batch_id: BatchId,
    items: &[NewRecommendation],
) -> Result<()> {
    for chunk in items.chunks(INSERT_CHUNK_ROWS) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO recommendations (batch_id, user_id, movie_id, rank, score, reason) ",
        );
        builder.push_values(chunk, |mut row, item| {
            row.push_bind(batch_id)
                .push_bind(item.user_id)
                .push_bind(item.movie_id)
                .push_bind(item.rank)
                .push_bind(item.score)
                .push_bind(&item.reason);
        });
        builder.build().execute(tx.conn()).await?;
    }
    Ok(())
}
