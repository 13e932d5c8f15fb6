use crate::proxy::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

pub const HITS: &str = "stash_cache_hits_total";
pub const MISSES: &str = "stash_cache_misses_total";
pub const BYPASS: &str = "stash_cache_bypass_total";
pub const STORES: &str = "stash_cache_stores_total";
pub const CAPTURE_FAILURES: &str = "stash_cache_capture_failures_total";
pub const EXPIRED: &str = "stash_cache_expired_total";
pub const ENTRIES: &str = "stash_cache_entries";

/// Register descriptions with the installed recorder.
pub fn describe() {
    ::metrics::describe_counter!(HITS, "GET requests served from the cache");
    ::metrics::describe_counter!(MISSES, "GET requests forwarded because no fresh entry existed");
    ::metrics::describe_counter!(BYPASS, "non-GET requests forwarded without touching the cache");
    ::metrics::describe_counter!(STORES, "entries written by response capture");
    ::metrics::describe_counter!(CAPTURE_FAILURES, "responses relayed without being cached");
    ::metrics::describe_counter!(EXPIRED, "entries removed by the expiry sweeper");
    ::metrics::describe_gauge!(ENTRIES, "entries currently held in the cache");
}

pub fn record_hit() {
    ::metrics::counter!(HITS).increment(1);
}

pub fn record_miss() {
    ::metrics::counter!(MISSES).increment(1);
}

pub fn record_bypass() {
    ::metrics::counter!(BYPASS).increment(1);
}

pub fn record_store(entries: usize) {
    ::metrics::counter!(STORES).increment(1);
    ::metrics::gauge!(ENTRIES).set(entries as f64);
}

pub fn record_capture_failure() {
    ::metrics::counter!(CAPTURE_FAILURES).increment(1);
}

pub fn record_sweep(removed: usize, entries: usize) {
    ::metrics::counter!(EXPIRED).increment(removed as u64);
    ::metrics::gauge!(ENTRIES).set(entries as f64);
}

/// Body of `GET /api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub entries: usize,
    pub stores: u64,
    pub expired: u64,
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl StatsSnapshot {
    fn from_state(state: &AppState) -> Self {
        let stats = state.store.stats();
        Self {
            entries: stats.entries,
            stores: stats.stores,
            expired: stats.expired,
            ttl_seconds: state.store.ttl().as_secs(),
            sweep_interval_seconds: state.sweep_interval.as_secs(),
        }
    }
}

/// GET /api/stats — one-shot stats endpoint.
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsSnapshot::from_state(&state))
}
