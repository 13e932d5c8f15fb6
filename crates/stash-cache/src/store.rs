use crate::entry::CacheEntry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

type EntryMap = HashMap<String, Arc<CacheEntry>, ahash::RandomState>;

/// Snapshot of store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub stores: u64,
    pub expired: u64,
}

/// Key → entry map behind one `RwLock`.
///
/// - **lookup**: read lock, clone the `Arc`, release. Lookups run in parallel.
/// - **store**: write lock, replace the slot, release.
/// - **sweep**: write lock once for the whole pass.
///
/// The lock is never held across I/O, and an entry only becomes visible once
/// it is fully built, so readers never see a partial entry. There is no size
/// bound: the map grows with the number of distinct keys not yet swept.
pub struct CacheStore {
    entries: RwLock<EntryMap>,
    ttl: Duration,
    stores: AtomicU64,
    expired: AtomicU64,
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_hasher(ahash::RandomState::new())),
            ttl,
            stores: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the entry for `key` whether it is fresh or stale. Freshness is
    /// the caller's decision.
    pub fn lookup(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or unconditionally overwrite the entry for `key`.
    pub fn store(&self, key: String, entry: CacheEntry) {
        let entry = Arc::new(entry);
        self.entries.write().insert(key, entry);
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove every entry with `created_at + ttl < now` in one locked pass.
    /// Returns the removed keys.
    pub fn sweep(&self, now: SystemTime) -> Vec<String> {
        let ttl = self.ttl;
        let mut removed = Vec::new();
        {
            let mut entries = self.entries.write();
            entries.retain(|key, entry| {
                if entry.is_expired(now, ttl) {
                    removed.push(key.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.expired.fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            stores: self.stores.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, StatusCode};

    const HOUR: Duration = Duration::from_secs(3600);

    fn t(minutes: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + minutes * 60)
    }

    fn entry(key: &str, body: &'static [u8], created_at: SystemTime) -> CacheEntry {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from(body.len()));
        CacheEntry::new(
            key,
            StatusCode::OK,
            &headers,
            Bytes::from_static(body),
            created_at,
        )
    }

    #[test]
    fn store_then_lookup() {
        let store = CacheStore::new(HOUR);

        store.store("/a".into(), entry("/a", b"alpha", t(0)));
        let got = store.lookup("/a").unwrap();
        assert_eq!(got.body, Bytes::from_static(b"alpha"));
        assert!(store.lookup("/missing").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_overwrites_unconditionally() {
        let store = CacheStore::new(HOUR);

        store.store("/a".into(), entry("/a", b"first", t(0)));
        store.store("/a".into(), entry("/a", b"second", t(5)));

        let got = store.lookup("/a").unwrap();
        assert_eq!(got.body, Bytes::from_static(b"second"));
        assert_eq!(got.created_at, t(5));
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().stores, 2);
    }

    #[test]
    fn overwrite_does_not_touch_held_entry() {
        let store = CacheStore::new(HOUR);
        store.store("/a".into(), entry("/a", b"first", t(0)));

        let held = store.lookup("/a").unwrap();
        store.store("/a".into(), entry("/a", b"second", t(1)));

        assert_eq!(held.body, Bytes::from_static(b"first"));
    }

    #[test]
    fn lookup_returns_stale_entries() {
        let store = CacheStore::new(HOUR);
        store.store("/old".into(), entry("/old", b"old", t(0)));

        let got = store.lookup("/old").unwrap();
        assert!(!got.is_fresh(t(61), store.ttl()));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = CacheStore::new(HOUR);
        store.store("/old".into(), entry("/old", b"old", t(0)));
        store.store("/new".into(), entry("/new", b"new", t(50)));

        let removed = store.sweep(t(61));

        assert_eq!(removed, vec!["/old".to_string()]);
        assert!(store.lookup("/old").is_none());
        assert!(store.lookup("/new").is_some());
        assert_eq!(store.stats().expired, 1);
    }

    #[test]
    fn sweep_keeps_entry_exactly_at_deadline() {
        let store = CacheStore::new(HOUR);
        store.store("/edge".into(), entry("/edge", b"edge", t(0)));

        assert!(store.sweep(t(60)).is_empty());
        assert_eq!(store.sweep(t(61)), vec!["/edge".to_string()]);
    }

    #[test]
    fn sweep_on_empty_store() {
        let store = CacheStore::new(HOUR);
        assert!(store.sweep(t(0)).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn stats_snapshot() {
        let store = CacheStore::new(HOUR);
        store.store("/a".into(), entry("/a", b"a", t(0)));
        store.store("/b".into(), entry("/b", b"b", t(0)));
        store.store("/c".into(), entry("/c", b"c", t(30)));
        store.sweep(t(65));

        assert_eq!(
            store.stats(),
            CacheStats {
                entries: 1,
                stores: 3,
                expired: 2,
            }
        );
    }

    #[test]
    fn concurrent_lookups_see_whole_entries() {
        use std::thread;

        let store = Arc::new(CacheStore::new(HOUR));
        let bodies: [&'static [u8]; 2] = [b"aaaaaaaa", b"bbbbbbbbbbbbbbbb"];
        store.store("/hot".into(), entry("/hot", bodies[0], t(0)));

        let mut handles = vec![];

        for w in 0..2 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..2000 {
                    let body = bodies[(w + i) % 2];
                    store.store("/hot".into(), entry("/hot", body, t(0)));
                }
            }));
        }

        for _ in 0..6 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..2000 {
                    let got = store.lookup("/hot").unwrap();
                    // content-length was captured alongside the body
                    let declared: usize = got.headers[0].1.to_str().unwrap().parse().unwrap();
                    assert_eq!(declared, got.body.len());
                    assert!(bodies.contains(&got.body.as_ref()));
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_sweep_and_store() {
        use std::thread;

        let store = Arc::new(CacheStore::new(HOUR));
        for i in 0..500 {
            store.store(format!("/k{i}"), entry("/k", b"x", t(0)));
        }

        let sweeper = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.sweep(t(120)).len())
        };
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..500 {
                    store.store(format!("/fresh{i}"), entry("/fresh", b"y", t(119)));
                }
            })
        };

        let swept = sweeper.join().unwrap();
        writer.join().unwrap();

        assert_eq!(swept, 500);
        assert_eq!(store.len(), 500);
    }

    #[test]
    fn is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CacheStore>();
        assert_send_sync::<Arc<CacheEntry>>();
    }
}
