//! Response cache: opaque keys, opaque byte payloads, strict TTLs.
//!
//! [`CacheBackend`] is the raw storage seam and is allowed to fail (an external
//! cache process can be down). [`CacheStore`] wraps a backend and is fail-open:
//! a backend failure turns `get` into a miss, `set` into a no-op and `invalidate`
//! into zero removals, logged at `warn`. Callers never see a cache error.
//!
//! Keys know nothing about catalog semantics. Invalidation takes a glob pattern
//! (`*` matches any run, `?` one character); a pattern without glob characters
//! matches by prefix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CacheError;

/// A stored payload. Owned by the cache store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    /// Hex SHA-256 of `payload`, checked on every read.
    pub checksum: String,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            key: key.into(),
            payload,
            checksum,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn is_intact(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }
}

fn payload_checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Compiled invalidation pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Result<Self, CacheError> {
        let mut expr = String::from("^");
        let mut has_glob = false;
        for ch in pattern.chars() {
            match ch {
                '*' => {
                    has_glob = true;
                    expr.push_str(".*");
                }
                '?' => {
                    has_glob = true;
                    expr.push('.');
                }
                _ => expr.push_str(&regex::escape(ch.encode_utf8(&mut [0u8; 4]))),
            }
        }
        if has_glob {
            expr.push('$');
        }
        let regex = Regex::new(&expr)
            .map_err(|e| CacheError::Backend(format!("invalid pattern '{pattern}': {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Raw cache storage. Implementations may fail; [`CacheStore`] absorbs failures.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores an entry, replacing any previous entry under the same key.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every entry whose key matches, returning how many were removed.
    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError>;
}

/// Writes between two sweeps of expired entries in [`MemoryCacheBackend`].
pub const DEFAULT_SWEEP_INTERVAL: usize = 256;

/// In-process backend.
///
/// Expired entries are dropped when read, and every `sweep_interval` writes the
/// whole map is swept, so keys that are never read again do not accumulate.
#[derive(Debug)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, CacheEntry>>,
    writes: AtomicUsize,
    sweep_interval: usize,
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend sweeping expired entries every `interval` writes (at least 1).
    pub fn with_sweep_interval(interval: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            sweep_interval: interval.max(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("memory cache lock poisoned".to_string()))
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired(now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let sweep = (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % self.sweep_interval == 0;
        let mut entries = self.lock()?;
        if sweep {
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, stale| !stale.is_expired(now));
            let swept = before - entries.len();
            if swept > 0 {
                debug!(swept, "cache: swept expired entries");
            }
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        Ok(before - entries.len())
    }
}

/// Fail-open cache store shared by all requests.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &"<dyn CacheBackend>")
            .finish()
    }
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh [`MemoryCacheBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()))
    }

    /// Returns the live payload for `key`, or `None` on miss, expiry, corruption
    /// or backend failure.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = match self.backend.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache: get failed, treating as miss");
                return None;
            }
        };

        if entry.is_expired(Instant::now()) {
            return None;
        }

        if !entry.is_intact() {
            warn!(key, "cache: checksum mismatch, discarding entry");
            if let Err(e) = self.backend.remove(key).await {
                warn!(key, error = %e, "cache: failed to discard corrupt entry");
            }
            return None;
        }

        Some(entry.payload)
    }

    /// Stores `payload` for `ttl`. A zero TTL stores nothing.
    pub async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = self.backend.set(CacheEntry::new(key, payload, ttl)).await {
            warn!(key, error = %e, "cache: set failed, continuing uncached");
        }
    }

    /// Removes the entry stored under exactly `key`. Returns false if the backend fails.
    pub async fn remove(&self, key: &str) -> bool {
        match self.backend.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key, error = %e, "cache: remove failed");
                false
            }
        }
    }

    /// Removes all entries matching `pattern`. Returns 0 if the backend fails.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let compiled = match KeyPattern::parse(pattern) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(pattern, error = %e, "cache: invalidate skipped");
                return 0;
            }
        };
        match self.backend.invalidate(&compiled).await {
            Ok(removed) => {
                debug!(pattern, removed, "cache: invalidated");
                removed
            }
            Err(e) => {
                warn!(pattern, error = %e, "cache: invalidate failed");
                0
            }
        }
    }
}
