//! Periodic batch generation

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::algorithm::Algorithm;
use super::orchestrator::BatchOrchestrator;
use crate::error::Error;

/// Run `algorithm` every `every` until a shutdown message arrives.
///
/// The first run happens one interval after start. A run that overlaps a
/// manually triggered one for the same algorithm is skipped.
pub fn spawn_batch_scheduler(
    orchestrator: Arc<BatchOrchestrator>,
    algorithm: Algorithm,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Skip first tick (runs immediately otherwise)
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("📊 Running scheduled {} batch...", algorithm);

                    match orchestrator.generate(algorithm, None).await {
                        Ok(outcome) => info!(
                            batch_id = outcome.batch.batch_id,
                            items = outcome.items,
                            "✅ Scheduled {} batch completed",
                            algorithm
                        ),
                        Err(Error::BatchInProgress { .. }) => {
                            warn!("Scheduled {} batch skipped, a run is in progress", algorithm)
                        }
                        Err(e) => error!("Scheduled {} batch failed: {:?}", algorithm, e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Batch scheduler shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommendationConfig;
    use crate::recommendation::store::{MemoryStore, RecommendationStore};

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let config = RecommendationConfig {
            worker_threads: 1,
            ..RecommendationConfig::default()
        };
        let orchestrator = Arc::new(BatchOrchestrator::new(store.clone(), config).unwrap());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_batch_scheduler(
            orchestrator,
            Algorithm::Popularity,
            Duration::from_secs(60),
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        // Let the spawned run finish its store calls
        for _ in 0..50 {
            if store.batch_count().await > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.list_batches(10).await.unwrap().len(), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
