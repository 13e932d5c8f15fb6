use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::time::{Duration, SystemTime};

/// One captured upstream response.
///
/// Entries are shared as `Arc<CacheEntry>` and never modified once built;
/// refreshing a key means storing a whole new entry.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Resource identifier (path + query) the entry was captured for.
    pub key: String,
    pub status: StatusCode,
    /// Header snapshot in the order the upstream sent them. Repeated names
    /// appear once per value.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
    pub created_at: SystemTime,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
        created_at: SystemTime,
    ) -> Self {
        Self {
            key: key.into(),
            status,
            headers: snapshot_headers(headers),
            body,
            created_at,
        }
    }

    /// Instant at which the entry turns stale, or `None` if `ttl` pushes it
    /// past what `SystemTime` can represent.
    pub fn expires_at(&self, ttl: Duration) -> Option<SystemTime> {
        self.created_at.checked_add(ttl)
    }

    /// Fresh while `now < created_at + ttl`.
    pub fn is_fresh(&self, now: SystemTime, ttl: Duration) -> bool {
        match self.expires_at(ttl) {
            Some(deadline) => now < deadline,
            None => true,
        }
    }

    /// Eligible for removal once `created_at + ttl < now`. An entry sitting
    /// exactly on its deadline is already stale but survives one more sweep.
    pub fn is_expired(&self, now: SystemTime, ttl: Duration) -> bool {
        match self.expires_at(ttl) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    /// Rebuild the header set, preserving order and duplicates.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            map.append(name.clone(), value.clone());
        }
        map
    }
}

fn snapshot_headers(headers: &HeaderMap) -> Vec<(HeaderName, HeaderValue)> {
    headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
