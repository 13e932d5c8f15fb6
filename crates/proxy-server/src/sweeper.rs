use crate::metrics;
use stash_cache::CacheStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawn the background expiry sweep. Runs every `interval` until `shutdown`
/// is cancelled; await the handle to know it has stopped.
pub fn spawn_sweeper(
    store: Arc<CacheStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; a freshly started cache has
        // nothing to sweep.
        ticker.tick().await;

        tracing::info!(
            interval_secs = interval.as_secs(),
            ttl_secs = store.ttl().as_secs(),
            "expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("expiry sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    sweep_once(&store, SystemTime::now());
                }
            }
        }
    })
}

/// One sweep pass. Each removed key is logged. Returns the number removed.
pub fn sweep_once(store: &CacheStore, now: SystemTime) -> usize {
    let removed = store.sweep(now);
    for key in &removed {
        tracing::info!(key = %key, "cache entry expired");
    }
    metrics::record_sweep(removed.len(), store.len());
    removed.len()
}
