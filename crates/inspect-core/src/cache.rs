use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::trace;

use crate::{Fingerprint, ItemDetails};

/// TTL store of resolved items.
///
/// Expired entries are never swept; they read as misses until a later `put`
/// overwrites them.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<Fingerprint, CacheEntry>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ItemDetails,
    expires_at: Instant,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ItemDetails> {
        self.get_at(fingerprint, Instant::now())
    }

    pub fn put(&self, fingerprint: Fingerprint, value: ItemDetails, ttl: Duration) {
        self.put_at(fingerprint, value, ttl, Instant::now());
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_at(&self, fingerprint: &Fingerprint, now: Instant) -> Option<ItemDetails> {
        let entry = self.entries.get(fingerprint)?;
        if now >= entry.expires_at {
            trace!(fingerprint = %fingerprint, "cache entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    fn put_at(&self, fingerprint: Fingerprint, value: ItemDetails, ttl: Duration, now: Instant) {
        // Saturate instead of panicking on absurd TTLs.
        let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(86_400 * 365));
        self.entries.insert(fingerprint, CacheEntry { value, expires_at });
    }
}
