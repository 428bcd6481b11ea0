//! Batch generation scenarios against the in-memory store

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

use movie_recs::config::RecommendationConfig;
use movie_recs::recommendation::model::{
    BatchId, BatchParams, BatchStatus, GenreId, MovieCount, MovieId, NewRecommendation,
    RatingEvent, RecommendationBatch, RecommendationItem, UserId, REASON_HYBRID,
    REASON_SIMILAR_GENRES, REASON_SIMILAR_USERS,
};
use movie_recs::recommendation::store::memory::{UserRole, UserStatus};
use movie_recs::recommendation::store::CandidateExclusions;
use movie_recs::{
    Algorithm, BatchOrchestrator, Error, MemoryStore, RecommendationReader, RecommendationStore,
    Result,
};

fn config() -> RecommendationConfig {
    RecommendationConfig {
        worker_threads: 2,
        ..RecommendationConfig::default()
    }
}

async fn add_users(store: &MemoryStore, ids: &[UserId]) {
    for &id in ids {
        store.insert_user(id, UserRole::User, UserStatus::Active).await;
    }
}

/// Two users sharing M1; U2 also rated M3
async fn cf_scenario() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    add_users(&store, &[1, 2]).await;
    for movie in 1..=3 {
        store.insert_movie(movie, true).await;
    }
    store.upsert_rating(1, 1, 5.0).await;
    store.upsert_rating(1, 2, 3.0).await;
    store.upsert_rating(2, 1, 5.0).await;
    store.upsert_rating(2, 3, 4.0).await;
    store
}

fn assert_contiguous_ranks(items: &[RecommendationItem]) {
    let mut by_user: HashMap<UserId, Vec<i32>> = HashMap::new();
    for item in items {
        by_user.entry(item.user_id).or_default().push(item.rank);
    }
    for (user_id, mut ranks) in by_user {
        ranks.sort_unstable();
        let expected: Vec<i32> = (1..=ranks.len() as i32).collect();
        assert_eq!(ranks, expected, "ranks for user {}", user_id);
    }
}

#[tokio::test]
async fn test_unknown_algorithm_is_rejected_without_record() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();

    let result = orchestrator.generate_batch("bogus", Some(10)).await;
    assert!(matches!(result, Err(Error::InvalidAlgorithm { .. })));
    assert_eq!(store.batch_count().await, 0);
}

#[tokio::test]
async fn test_invalid_top_n_is_rejected_without_record() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();

    assert_err!(orchestrator.generate_batch("hybrid", Some(0)).await);
    assert_err!(orchestrator.generate_batch("hybrid", Some(1_000)).await);
    assert_eq!(store.batch_count().await, 0);
}

#[tokio::test]
async fn test_collaborative_batch_recommends_similar_users_movie() {
    let store = cf_scenario().await;
    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();

    let outcome = assert_ok!(orchestrator.generate_batch("cf", Some(10)).await);
    assert_eq!(outcome.batch.algorithm, Algorithm::Collaborative);
    assert_eq!(outcome.batch.status, BatchStatus::Success);
    assert_eq!(outcome.users, 2);

    let reader = RecommendationReader::new(store.clone());
    let recs = reader.get_recommendations(1, None).await.unwrap();
    assert_eq!(recs.items.len(), 1);
    assert_eq!(recs.items[0].movie_id, 3);
    assert_eq!(recs.items[0].rank, 1);
    assert_eq!(recs.items[0].reason.as_deref(), Some(REASON_SIMILAR_USERS));

    assert_contiguous_ranks(&store.batch_items(outcome.batch.batch_id).await);
}

#[tokio::test]
async fn test_popularity_falls_back_to_rating_counts() {
    let store = Arc::new(MemoryStore::new());
    add_users(&store, &[1, 2]).await;
    store.insert_movie(1, true).await;
    store.upsert_rating(1, 1, 4.0).await;
    store
        .record_watch(2, 1, Utc::now() - ChronoDuration::days(30))
        .await;

    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();
    let outcome = orchestrator.generate_batch("hot", Some(5)).await.unwrap();
    assert_eq!(outcome.batch.algorithm, Algorithm::Popularity);

    let reader = RecommendationReader::new(store.clone());
    for user_id in [1, 2] {
        let recs = reader.get_recommendations(user_id, None).await.unwrap();
        assert_eq!(
            recs.items.iter().map(|i| i.movie_id).collect::<Vec<_>>(),
            vec![1]
        );
    }
}

#[tokio::test]
async fn test_only_active_regular_users_get_items() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(1, UserRole::User, UserStatus::Active).await;
    store.insert_user(2, UserRole::User, UserStatus::Banned).await;
    store.insert_user(3, UserRole::Admin, UserStatus::Active).await;
    store.record_watch(9, 40, Utc::now()).await;

    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();
    let outcome = orchestrator
        .generate_batch("popularity", None)
        .await
        .unwrap();
    assert_eq!(outcome.users, 1);

    let items = store.batch_items(outcome.batch.batch_id).await;
    assert!(items.iter().all(|i| i.user_id == 1));
}

#[tokio::test]
async fn test_content_batch_uses_favourite_genres() {
    let store = Arc::new(MemoryStore::new());
    add_users(&store, &[1, 2]).await;
    // genre 10: movies 1..=5, genre 20: movies 6..=7
    for movie in 1..=7 {
        store.insert_movie(movie, movie != 5).await;
        store
            .insert_movie_genre(movie, if movie <= 5 { 10 } else { 20 })
            .await;
    }
    store.upsert_rating(1, 1, 5.0).await;
    store.record_watch(1, 4, Utc::now()).await;

    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();
    let outcome = orchestrator.generate_batch("content", Some(10)).await.unwrap();

    let reader = RecommendationReader::new(store.clone());
    let u1 = reader.get_recommendations(1, None).await.unwrap();
    assert_eq!(
        u1.items.iter().map(|i| i.movie_id).collect::<Vec<_>>(),
        vec![3, 2]
    );
    assert!(u1
        .items
        .iter()
        .all(|i| i.score == 1.0 && i.reason.as_deref() == Some(REASON_SIMILAR_GENRES)));

    // No signal for user 2
    let u2 = reader.get_recommendations(2, None).await.unwrap();
    assert_eq!(u2.batch.map(|b| b.batch_id), Some(outcome.batch.batch_id));
    assert!(u2.items.is_empty());
}

#[tokio::test]
async fn test_hybrid_batch_blends_sources() {
    let store = cf_scenario().await;
    store.record_watch(2, 2, Utc::now()).await;

    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();
    let outcome = orchestrator.generate_batch("hybrid", Some(2)).await.unwrap();
    assert!(outcome
        .batch
        .params
        .as_ref()
        .and_then(|p| p.get("weights"))
        .is_some());

    let items = store.batch_items(outcome.batch.batch_id).await;
    assert!(!items.is_empty());
    assert!(items.iter().all(|i| i.reason.as_deref() == Some(REASON_HYBRID)));
    assert_contiguous_ranks(&items);

    // U1: M3 from CF (0.4 × 4.0) outranks M2 from popularity (0.2 × 1)
    let u1: Vec<MovieId> = items
        .iter()
        .filter(|i| i.user_id == 1)
        .map(|i| i.movie_id)
        .collect();
    assert_eq!(u1, vec![3, 2]);
}

#[tokio::test]
async fn test_reader_is_idempotent_and_filters_by_algorithm() {
    let store = cf_scenario().await;
    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();
    orchestrator.generate_batch("collaborative", None).await.unwrap();

    let reader = RecommendationReader::new(store.clone());
    let first = reader.get_recommendations(1, None).await.unwrap();
    let second = reader.get_recommendations(1, None).await.unwrap();
    assert_eq!(first, second);

    let none = reader
        .get_recommendations(1, Some(Algorithm::Content))
        .await
        .unwrap();
    assert!(none.batch.is_none());
    assert!(none.items.is_empty());
}

/// Signals when a run starts and holds it until released
struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

/// Delegates to a [`MemoryStore`], optionally failing reads or commits, or holding runs at a gate
struct FaultyStore {
    inner: MemoryStore,
    fail_commit: AtomicBool,
    fail_ratings: AtomicBool,
    gate: Option<Arc<Gate>>,
}

impl FaultyStore {
    fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_commit: AtomicBool::new(false),
            fail_ratings: AtomicBool::new(false),
            gate: None,
        }
    }

    fn failing(inner: MemoryStore) -> Self {
        let store = Self::wrap(inner);
        store.fail_commit.store(true, Ordering::SeqCst);
        store
    }

    fn failing_ratings(inner: MemoryStore) -> Self {
        let store = Self::wrap(inner);
        store.fail_ratings.store(true, Ordering::SeqCst);
        store
    }

    fn gated(inner: MemoryStore, gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::wrap(inner)
        }
    }
}

#[async_trait]
impl RecommendationStore for FaultyStore {
    async fn fetch_active_user_ids(&self) -> Result<Vec<UserId>> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.inner.fetch_active_user_ids().await
    }

    async fn fetch_all_ratings(&self) -> Result<Vec<RatingEvent>> {
        if self.fail_ratings.load(Ordering::SeqCst) {
            return Err(Error::database("injected ratings read failure"));
        }
        self.inner.fetch_all_ratings().await
    }

    async fn fetch_recent_watch_counts(
        &self,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<MovieCount>> {
        self.inner.fetch_recent_watch_counts(window_days, limit).await
    }

    async fn fetch_rating_counts(&self, limit: usize) -> Result<Vec<MovieCount>> {
        self.inner.fetch_rating_counts(limit).await
    }

    async fn fetch_user_top_genres(&self, user_id: UserId, limit: usize) -> Result<Vec<GenreId>> {
        self.inner.fetch_user_top_genres(user_id, limit).await
    }

    async fn fetch_genre_candidate_movies(
        &self,
        user_id: UserId,
        genre_ids: &[GenreId],
        exclusions: CandidateExclusions,
        limit: usize,
    ) -> Result<Vec<MovieId>> {
        self.inner
            .fetch_genre_candidate_movies(user_id, genre_ids, exclusions, limit)
            .await
    }

    async fn create_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        status: BatchStatus,
    ) -> Result<BatchId> {
        self.inner.create_batch(algorithm, params, status).await
    }

    async fn commit_batch(
        &self,
        algorithm: Algorithm,
        params: &BatchParams,
        items: &[NewRecommendation],
    ) -> Result<RecommendationBatch> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(Error::ConstraintViolation {
                message: "injected commit failure".into(),
            });
        }
        self.inner.commit_batch(algorithm, params, items).await
    }

    async fn fetch_latest_successful_batch(
        &self,
        algorithm: Option<Algorithm>,
    ) -> Result<Option<RecommendationBatch>> {
        self.inner.fetch_latest_successful_batch(algorithm).await
    }

    async fn fetch_batch_items_for_user(
        &self,
        batch_id: BatchId,
        user_id: UserId,
    ) -> Result<Vec<RecommendationItem>> {
        self.inner.fetch_batch_items_for_user(batch_id, user_id).await
    }

    async fn list_batches(&self, limit: usize) -> Result<Vec<RecommendationBatch>> {
        self.inner.list_batches(limit).await
    }
}

/// Ratings for a CF run plus one earlier successful popularity batch
async fn store_with_previous_batch() -> (MemoryStore, RecommendationBatch) {
    let inner = MemoryStore::new();
    add_users(&inner, &[1, 2]).await;
    inner.upsert_rating(1, 1, 5.0).await;
    inner.upsert_rating(2, 1, 5.0).await;
    inner.upsert_rating(2, 3, 4.0).await;
    let previous = inner
        .commit_batch(
            Algorithm::Popularity,
            &BatchParams {
                top_n: 10,
                window_days: 7,
                weights: None,
            },
            &[NewRecommendation {
                user_id: 1,
                movie_id: 7,
                rank: 1,
                score: 1.0,
                reason: "Hot in last 7 days".into(),
            }],
        )
        .await
        .unwrap();
    (inner, previous)
}

#[tokio::test]
async fn test_failed_commit_records_failed_batch_and_keeps_previous() {
    let (inner, previous) = store_with_previous_batch().await;

    let store = Arc::new(FaultyStore::failing(inner));
    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();

    let err = orchestrator.generate_batch("cf", Some(10)).await.unwrap_err();
    let failed_batch_id = match err {
        Error::BatchGenerationFailed {
            algorithm,
            failed_batch_id,
            ..
        } => {
            assert_eq!(algorithm, Algorithm::Collaborative);
            failed_batch_id.expect("failed batch should be recorded")
        }
        other => panic!("unexpected error: {:?}", other),
    };

    let batches = store.list_batches(20).await.unwrap();
    let failed = batches
        .iter()
        .find(|b| b.batch_id == failed_batch_id)
        .unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    assert!(store.inner.batch_items(failed_batch_id).await.is_empty());

    // Readers still see the previous successful batch
    let reader = RecommendationReader::new(store.clone());
    let recs = reader.get_recommendations(1, None).await.unwrap();
    assert_eq!(recs.batch.map(|b| b.batch_id), Some(previous.batch_id));
}

#[tokio::test]
async fn test_concurrent_run_of_same_algorithm_is_rejected() {
    let inner = MemoryStore::new();
    add_users(&inner, &[1]).await;
    let gate = Gate::new();
    let store = Arc::new(FaultyStore::gated(inner, gate.clone()));
    let orchestrator = Arc::new(BatchOrchestrator::new(store.clone(), config()).unwrap());

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.generate(Algorithm::Popularity, None).await })
    };
    gate.entered.notified().await;

    let second = orchestrator.generate(Algorithm::Popularity, None).await;
    assert!(matches!(
        second,
        Err(Error::BatchInProgress {
            algorithm: Algorithm::Popularity
        })
    ));
    assert_eq!(store.inner.batch_count().await, 0);

    gate.release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.batch.status, BatchStatus::Success);
    assert_eq!(store.inner.batch_count().await, 1);
}

#[tokio::test]
async fn test_failed_candidate_generation_records_failed_batch_and_keeps_previous() {
    let (inner, previous) = store_with_previous_batch().await;
    let store = Arc::new(FaultyStore::failing_ratings(inner));
    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();

    let err = orchestrator
        .generate_batch("collaborative", Some(5))
        .await
        .unwrap_err();
    let failed_batch_id = match err {
        Error::BatchGenerationFailed {
            algorithm: Algorithm::Collaborative,
            failed_batch_id: Some(id),
            source,
        } => {
            assert!(matches!(*source, Error::Database { .. }));
            id
        }
        other => panic!("unexpected error: {:?}", other),
    };

    let batches = store.list_batches(20).await.unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].batch_id, failed_batch_id);
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert_eq!(
        batches[0].params.as_ref().and_then(|p| p.get("top_n")),
        Some(&serde_json::json!(5))
    );
    assert!(store.inner.batch_items(failed_batch_id).await.is_empty());

    let reader = RecommendationReader::new(store.clone());
    let recs = reader.get_recommendations(1, None).await.unwrap();
    assert_eq!(recs.batch.map(|b| b.batch_id), Some(previous.batch_id));
    assert_eq!(recs.items.iter().map(|i| i.movie_id).collect::<Vec<_>>(), vec![7]);
}

/// Poll until the store holds `expected` batch records
async fn wait_for_batches(store: &MemoryStore, expected: usize) {
    for _ in 0..100 {
        if store.batch_count().await >= expected {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {} batch records", expected);
}

#[tokio::test]
async fn test_cancelled_run_records_failed_batch() {
    let inner = MemoryStore::new();
    add_users(&inner, &[1]).await;
    let gate = Gate::new();
    let store = Arc::new(FaultyStore::gated(inner, gate.clone()));
    let orchestrator = Arc::new(BatchOrchestrator::new(store.clone(), config()).unwrap());

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.generate(Algorithm::Hybrid, Some(5)).await })
    };
    gate.entered.notified().await;
    run.abort();
    assert!(assert_err!(run.await).is_cancelled());

    wait_for_batches(&store.inner, 1).await;
    let batches = store.list_batches(20).await.unwrap();
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert_eq!(batches[0].algorithm, Algorithm::Hybrid);
    assert!(batches[0]
        .params
        .as_ref()
        .and_then(|p| p.get("weights"))
        .is_some());
    assert!(store.inner.batch_items(batches[0].batch_id).await.is_empty());

    // The guard is released, so the next run goes through
    assert!(!orchestrator.is_busy());
    gate.release.notify_one();
    let outcome = assert_ok!(orchestrator.generate(Algorithm::Hybrid, Some(5)).await);
    assert_eq!(outcome.batch.status, BatchStatus::Success);
}

#[tokio::test]
async fn test_timed_out_request_still_finishes_its_batch() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use movie_recs::api::{create_router, AppState};
    use movie_recs::config::ApiConfig;
    use tower::ServiceExt;

    let inner = MemoryStore::new();
    add_users(&inner, &[1]).await;
    inner.record_watch(1, 42, Utc::now()).await;
    let gate = Gate::new();
    let store = Arc::new(FaultyStore::gated(inner, gate.clone()));
    let orchestrator = Arc::new(BatchOrchestrator::new(store.clone(), config()).unwrap());
    let state = Arc::new(AppState::new(store.clone(), orchestrator.clone(), None));
    let api_config = ApiConfig {
        port: 0,
        host: "127.0.0.1".to_string(),
        request_timeout: std::time::Duration::from_millis(200),
        cors_enabled: false,
        admin_token: None,
        metrics_port: 0,
    };
    let app = create_router(state, &api_config);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/admin/recommendations/generate")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"algorithm":"hybrid"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    // The run outlived the request and is parked at the gate
    gate.entered.notified().await;
    assert!(orchestrator.is_busy());
    assert_eq!(store.inner.batch_count().await, 0);

    gate.release.notify_one();
    orchestrator.wait_idle().await;

    let batches = store.list_batches(20).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].algorithm, Algorithm::Hybrid);
    assert_eq!(batches[0].status, BatchStatus::Success);

    let reader = RecommendationReader::new(store.clone());
    let recs = reader.get_recommendations(1, None).await.unwrap();
    assert_eq!(recs.batch.map(|b| b.batch_id), Some(batches[0].batch_id));
}

#[tokio::test]
async fn test_popularity_batch_breaks_count_ties_by_movie_id_desc() {
    let store = Arc::new(MemoryStore::new());
    add_users(&store, &[1, 2]).await;
    let now = Utc::now();
    for (user_id, movie_id) in [(1, 11), (2, 11), (1, 12), (1, 30), (2, 30)] {
        store.record_watch(user_id, movie_id, now).await;
    }

    let orchestrator = BatchOrchestrator::new(store.clone(), config()).unwrap();
    let outcome = assert_ok!(orchestrator.generate(Algorithm::Popularity, Some(10)).await);

    let items = store.batch_items(outcome.batch.batch_id).await;
    for user_id in [1, 2] {
        let ranked: Vec<(MovieId, i32)> = items
            .iter()
            .filter(|i| i.user_id == user_id)
            .map(|i| (i.movie_id, i.rank))
            .collect();
        assert_eq!(ranked, vec![(30, 1), (11, 2), (12, 3)]);
    }
}
