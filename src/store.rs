use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::StoreConfig;
use crate::key::DedupKey;

/// Backing store for locks and committed results, keyed by [`DedupKey`].
///
/// `try_lock` must be atomic: at most one caller may hold the lock for a key
/// at any time. Implementations backed by a remote cache should acquire with
/// a single set-if-absent round trip and are encouraged to attach a TTL so a
/// crashed holder cannot lock a key out forever.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Returns true if the lock was acquired, false if it is already held.
    async fn try_lock(&self, key: &DedupKey) -> Result<bool>;

    async fn get_cached_result(&self, key: &DedupKey) -> Result<Option<String>>;

    /// Store a committed result, replacing any previous entry.
    async fn set_cached_result(&self, key: &DedupKey, result: &str) -> Result<()>;

    /// Release the lock regardless of who holds it.
    async fn unlock(&self, key: &DedupKey) -> Result<()>;
}

#[derive(Debug, Clone)]
struct LockEntry {
    token: u64,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct CachedEntry {
    body: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Entries {
    locks: HashMap<String, LockEntry>,
    results: HashMap<String, CachedEntry>,
    next_sweep: Option<Instant>,
}

impl Entries {
    fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.locks.len() + self.results.len();
        self.locks.retain(|_, entry| !expired(entry.expires_at, now));
        self.results.retain(|_, entry| !expired(entry.expires_at, now));
        before - self.locks.len() - self.results.len()
    }
}

fn expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| at <= now)
}

/// In-memory implementation used by default and in tests.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<Entries>,
    next_token: AtomicU64,
    lock_ttl: Option<Duration>,
    result_ttl: Option<Duration>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            lock_ttl: config.lock_ttl(),
            result_ttl: config.result_ttl(),
            ..Self::default()
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    /// Returns true while an unexpired lock is held for `key`.
    pub fn is_locked(&self, key: &DedupKey) -> bool {
        let now = Instant::now();
        self.entries()
            .map(|guard| {
                guard
                    .locks
                    .get(key.as_str())
                    .is_some_and(|entry| !expired(entry.expires_at, now))
            })
            .unwrap_or(false)
    }

    /// Ownership token of the current lock holder, if any.
    pub fn lock_token(&self, key: &DedupKey) -> Option<u64> {
        let now = Instant::now();
        let guard = self.entries().ok()?;
        guard
            .locks
            .get(key.as_str())
            .filter(|entry| !expired(entry.expires_at, now))
            .map(|entry| entry.token)
    }

    /// Number of unexpired cached results.
    pub fn cached_len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .map(|guard| {
                guard
                    .results
                    .values()
                    .filter(|entry| !expired(entry.expires_at, now))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop every expired lock and result, returning how many entries were removed.
    ///
    /// Writes also sweep on their own, at most once per shortest configured
    /// TTL, so calling this is only needed to reclaim memory eagerly.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .map(|mut guard| guard.evict_expired(now))
            .unwrap_or(0)
    }

    fn sweep_if_due(&self, entries: &mut Entries, now: Instant) {
        let interval = match (self.lock_ttl, self.result_ttl) {
            (Some(a), Some(b)) => a.min(b),
            (Some(ttl), None) | (None, Some(ttl)) => ttl,
            (None, None) => return,
        };
        if entries.next_sweep.is_some_and(|at| at > now) {
            return;
        }
        let evicted = entries.evict_expired(now);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted expired idempotency entries");
        }
        entries.next_sweep = Some(now + interval);
    }

    fn entries(&self) -> Result<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("poisoned idempotency store"))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_lock(&self, key: &DedupKey) -> Result<bool> {
        let now = Instant::now();
        let mut guard = self.entries()?;
        self.sweep_if_due(&mut guard, now);
        if let Some(existing) = guard.locks.get(key.as_str())
            && !expired(existing.expires_at, now)
        {
            return Ok(false);
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        guard.locks.insert(
            key.as_str().to_string(),
            LockEntry {
                token,
                expires_at: self.lock_ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn get_cached_result(&self, key: &DedupKey) -> Result<Option<String>> {
        let now = Instant::now();
        let mut guard = self.entries()?;
        match guard.results.get(key.as_str()) {
            None => return Ok(None),
            Some(entry) if !expired(entry.expires_at, now) => return Ok(Some(entry.body.clone())),
            Some(_) => {}
        }
        guard.results.remove(key.as_str());
        Ok(None)
    }

    async fn set_cached_result(&self, key: &DedupKey, result: &str) -> Result<()> {
        let now = Instant::now();
        let mut guard = self.entries()?;
        self.sweep_if_due(&mut guard, now);
        guard.results.insert(
            key.as_str().to_string(),
            CachedEntry {
                body: result.to_string(),
                expires_at: self.result_ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn unlock(&self, key: &DedupKey) -> Result<()> {
        let mut guard = self.entries()?;
        guard.locks.remove(key.as_str());
        Ok(())
    }
}
