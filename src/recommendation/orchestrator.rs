//! Batch Orchestrator
//!
//! Drives one batch run end to end:
//!
//! 1. Validate the algorithm name and `top_n` (no side effects on rejection)
//! 2. Take the per-algorithm run guard
//! 3. Enumerate eligible users and dispatch the strategy
//! 4. Assign contiguous ranks per user
//! 5. Commit batch and items in one transaction
//!
//! Any failure after step 2 is recorded as a separate `failed` batch with no
//! items before the error is returned. A run dropped before it reaches an
//! outcome records the same `failed` batch from a background task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::algorithm::Algorithm;
use super::metrics::{self, PerformanceTimer, SLOW_PHASE_MS};
use super::model::{
    BatchId, BatchParams, BatchStatus, CandidateMap, HybridWeights, NewRecommendation,
    RecommendationBatch, UserId,
};
use super::store::{CandidateExclusions, RecommendationStore};
use super::strategies::{strategy_for, StrategyContext};
use crate::config::RecommendationConfig;
use crate::database::with_retry;
use crate::error::{Error, Result};

const FAILURE_RECORD_ATTEMPTS: u32 = 3;
const FAILURE_RECORD_DELAY: Duration = Duration::from_millis(200);
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch: RecommendationBatch,
    /// Eligible users at generation time
    pub users: usize,
    /// Items written
    pub items: usize,
}

pub struct BatchOrchestrator {
    store: Arc<dyn RecommendationStore>,
    config: RecommendationConfig,
    workers: Arc<rayon::ThreadPool>,
    running: Mutex<HashSet<Algorithm>>,
}

/// Held for the duration of a run; releases the algorithm on drop
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<Algorithm>>,
    algorithm: Algorithm,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.algorithm);
    }
}

/// Armed while a run is in flight; records a `failed` batch if dropped armed
struct CancellationRecorder {
    store: Arc<dyn RecommendationStore>,
    algorithm: Algorithm,
    params: Option<BatchParams>,
    started: Instant,
}

impl CancellationRecorder {
    fn disarm(&mut self) {
        self.params = None;
    }
}

impl Drop for CancellationRecorder {
    fn drop(&mut self) {
        let Some(params) = self.params.take() else {
            return;
        };
        let algorithm = self.algorithm;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("{} batch cancelled outside a runtime, failure not recorded", algorithm);
            return;
        };

        warn!("⚠️ {} batch cancelled mid-run, recording failure", algorithm);
        let store = Arc::clone(&self.store);
        let elapsed = self.started.elapsed();
        runtime.spawn(async move {
            record_failure(store.as_ref(), algorithm, &params).await;
            metrics::record_batch(algorithm, BatchStatus::Failed, elapsed, 0);
        });
    }
}

impl BatchOrchestrator {
    pub fn new(store: Arc<dyn RecommendationStore>, config: RecommendationConfig) -> Result<Self> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("rec-worker-{}", i))
            .build()
            .map_err(Error::internal)?;

        info!(
            "🧮 Scoring pool ready with {} worker threads",
            workers.current_num_threads()
        );

        Ok(Self {
            store,
            config,
            workers: Arc::new(workers),
            running: Mutex::new(HashSet::new()),
        })
    }

    /// Generate a batch for an algorithm given by name (aliases accepted)
    pub async fn generate_batch(&self, algorithm: &str, top_n: Option<usize>) -> Result<BatchOutcome> {
        let algorithm: Algorithm = algorithm.parse()?;
        self.generate(algorithm, top_n).await
    }

    /// Run [`generate_batch`](Self::generate_batch) on its own task.
    ///
    /// Dropping the handle detaches the run; it still commits or records its failure.
    pub fn spawn_batch(
        self: &Arc<Self>,
        algorithm: &str,
        top_n: Option<usize>,
    ) -> JoinHandle<Result<BatchOutcome>> {
        let orchestrator = Arc::clone(self);
        let algorithm = algorithm.to_string();
        tokio::spawn(async move { orchestrator.generate_batch(&algorithm, top_n).await })
    }

    /// True while any run holds its guard
    pub fn is_busy(&self) -> bool {
        !self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Wait until no run is in flight
    pub async fn wait_idle(&self) {
        while self.is_busy() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    #[instrument(skip(self))]
    pub async fn generate(&self, algorithm: Algorithm, top_n: Option<usize>) -> Result<BatchOutcome> {
        let top_n = self.validate_top_n(top_n)?;
        let _guard = self.try_acquire(algorithm)?;

        let params = BatchParams {
            top_n,
            window_days: self.config.popularity_window_days,
            weights: (algorithm == Algorithm::Hybrid).then(HybridWeights::default),
        };

        let timer = PerformanceTimer::new(&format!("{} batch", algorithm));
        info!("🚀 Generating {} batch (top_n={})", algorithm, top_n);

        let mut recorder = CancellationRecorder {
            store: Arc::clone(&self.store),
            algorithm,
            params: Some(params.clone()),
            started: Instant::now(),
        };
        let result = self.run(algorithm, &params).await;
        recorder.disarm();

        match result {
            Ok(outcome) => {
                metrics::record_batch(
                    algorithm,
                    BatchStatus::Success,
                    timer.elapsed(),
                    outcome.items,
                );
                timer.log_if_slow(SLOW_PHASE_MS);
                info!(
                    batch_id = outcome.batch.batch_id,
                    users = outcome.users,
                    items = outcome.items,
                    "✅ {} batch committed",
                    algorithm
                );
                Ok(outcome)
            }
            Err(source) => {
                error!(error = %source, "❌ {} batch failed", algorithm);
                let failed_batch_id =
                    record_failure(self.store.as_ref(), algorithm, &params).await;
                metrics::record_batch(algorithm, BatchStatus::Failed, timer.elapsed(), 0);
                Err(Error::BatchGenerationFailed {
                    algorithm,
                    failed_batch_id,
                    source: Box::new(source),
                })
            }
        }
    }

    fn validate_top_n(&self, top_n: Option<usize>) -> Result<usize> {
        let top_n = top_n.unwrap_or(self.config.default_top_n);
        if top_n == 0 || top_n > self.config.max_top_n {
            return Err(Error::InvalidTopN {
                value: top_n,
                max: self.config.max_top_n,
            });
        }
        Ok(top_n)
    }

    fn try_acquire(&self, algorithm: Algorithm) -> Result<RunGuard<'_>> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(algorithm) {
            warn!("{} batch already running, rejecting", algorithm);
            return Err(Error::BatchInProgress { algorithm });
        }
        Ok(RunGuard {
            running: &self.running,
            algorithm,
        })
    }

    async fn run(&self, algorithm: Algorithm, params: &BatchParams) -> Result<BatchOutcome> {
        let users = self.store.fetch_active_user_ids().await?;
        let user_count = users.len();

        let ctx = StrategyContext {
            store: Arc::clone(&self.store),
            users,
            params: params.clone(),
            top_genres: self.config.top_genres,
            content_concurrency: self.config.content_concurrency,
            exclusions: CandidateExclusions::default(),
            workers: Arc::clone(&self.workers),
        };

        let candidates = {
            let timer = PerformanceTimer::new(&format!("{} candidate generation", algorithm));
            let candidates = strategy_for(algorithm).generate(&ctx).await?;
            timer.log_if_slow(SLOW_PHASE_MS);
            candidates
        };

        let items = assign_ranks(&ctx.users, candidates, params.top_n)?;
        let item_count = items.len();

        let batch = {
            let _timer = PerformanceTimer::new(&format!("{} batch commit", algorithm));
            self.store.commit_batch(algorithm, params, &items).await?
        };

        Ok(BatchOutcome {
            batch,
            users: user_count,
            items: item_count,
        })
    }
}

/// Write the `failed` record, retrying transient storage errors
async fn record_failure(
    store: &dyn RecommendationStore,
    algorithm: Algorithm,
    params: &BatchParams,
) -> Option<BatchId> {
    let result = with_retry(
        || store.create_batch(algorithm, params, BatchStatus::Failed),
        FAILURE_RECORD_ATTEMPTS,
        FAILURE_RECORD_DELAY,
    )
    .await;

    match result {
        Ok(batch_id) => Some(batch_id),
        Err(e) => {
            error!(error = %e, "Could not record failed {} batch", algorithm);
            None
        }
    }
}

/// Flatten per-user candidate lists into items with ranks 1..=k, in eligible-user order
fn assign_ranks(
    users: &[UserId],
    mut candidates: CandidateMap,
    top_n: usize,
) -> Result<Vec<NewRecommendation>> {
    let mut items = Vec::new();
    for user_id in users {
        let Some(list) = candidates.remove(user_id) else {
            continue;
        };
        for (idx, candidate) in list.into_iter().take(top_n).enumerate() {
            let rank = i32::try_from(idx + 1).map_err(Error::internal)?;
            items.push(NewRecommendation {
                user_id: *user_id,
                movie_id: candidate.movie_id,
                rank,
                score: candidate.score,
                reason: candidate.reason,
            });
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommendation::model::Candidate;
    use crate::recommendation::store::MemoryStore;

    fn orchestrator() -> BatchOrchestrator {
        let config = RecommendationConfig {
            worker_threads: 1,
            ..RecommendationConfig::default()
        };
        BatchOrchestrator::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[test]
    fn test_assign_ranks_is_contiguous_per_user() {
        let candidates = CandidateMap::from([
            (
                1,
                vec![
                    Candidate::new(10, 3.0, "r"),
                    Candidate::new(11, 2.0, "r"),
                    Candidate::new(12, 1.0, "r"),
                ],
            ),
            (2, vec![Candidate::new(10, 3.0, "r")]),
            (99, vec![Candidate::new(10, 3.0, "r")]),
        ]);

        let items = assign_ranks(&[1, 2, 3], candidates, 2).unwrap();
        let ranks: Vec<(UserId, i32)> = items.iter().map(|i| (i.user_id, i.rank)).collect();
        assert_eq!(ranks, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_top_n_bounds() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.validate_top_n(None).unwrap(), 10);
        assert_eq!(orchestrator.validate_top_n(Some(100)).unwrap(), 100);
        assert!(matches!(
            orchestrator.validate_top_n(Some(0)),
            Err(Error::InvalidTopN { value: 0, .. })
        ));
        assert!(matches!(
            orchestrator.validate_top_n(Some(101)),
            Err(Error::InvalidTopN { value: 101, max: 100 })
        ));
    }

    #[test]
    fn test_run_guard_is_per_algorithm() {
        let orchestrator = orchestrator();
        let guard = orchestrator.try_acquire(Algorithm::Content).unwrap();
        assert!(matches!(
            orchestrator.try_acquire(Algorithm::Content),
            Err(Error::BatchInProgress {
                algorithm: Algorithm::Content
            })
        ));
        assert!(orchestrator.try_acquire(Algorithm::Hybrid).is_ok());

        drop(guard);
        assert!(orchestrator.try_acquire(Algorithm::Content).is_ok());
    }

    #[tokio::test]
    async fn test_wait_idle_tracks_run_guards() {
        let orchestrator = orchestrator();
        assert!(!orchestrator.is_busy());
        orchestrator.wait_idle().await;

        let guard = orchestrator.try_acquire(Algorithm::Popularity).unwrap();
        assert!(orchestrator.is_busy());
        drop(guard);
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_disarmed_recorder_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut recorder = CancellationRecorder {
            store: store.clone(),
            algorithm: Algorithm::Content,
            params: Some(BatchParams {
                top_n: 5,
                window_days: 7,
                weights: None,
            }),
            started: Instant::now(),
        };
        recorder.disarm();
        drop(recorder);

        tokio::task::yield_now().await;
        assert_eq!(store.batch_count().await, 0);
    }
}
