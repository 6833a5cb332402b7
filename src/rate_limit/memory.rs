use super::store::{BruteForceKeys, BruteForceLimits, BruteForceMode, RateLimitStore, StoreError};
use super::window::Clock;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Full expiry sweep runs once per this many operations
const SWEEP_INTERVAL: u32 = 1024;

/// In-process store with the same verdicts as the Lua scripts.
///
/// All entries sit behind one mutex so that multi-key operations (the
/// brute-force attempts/lock pair) are indivisible. Expiry is evaluated lazily
/// against the injected clock: each operation expires the keys it touches, and
/// untouched keys are swept every `SWEEP_INTERVAL` operations. State is local
/// to this process, so this store only coordinates a single instance.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    ops_since_sweep: u32,
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

#[derive(Debug)]
enum Value {
    Counter(u64),
    Timestamps(VecDeque<u64>),
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    /// Number of live keys (for testing/monitoring)
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.inner
            .lock()
            .map(|inner| inner.entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entries<T>(
        &self,
        touched: &[&str],
        f: impl FnOnce(&mut HashMap<String, Entry>, u64) -> T,
    ) -> Result<T, StoreError> {
        let now = self.clock.now_millis();
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;

        for key in touched {
            if inner.entries.get(*key).is_some_and(|e| e.is_expired(now)) {
                inner.entries.remove(*key);
            }
        }

        inner.ops_since_sweep += 1;
        if inner.ops_since_sweep >= SWEEP_INTERVAL {
            inner.ops_since_sweep = 0;
            let before = inner.entries.len();
            inner.entries.retain(|_, entry| !entry.is_expired(now));
            debug!(removed = before - inner.entries.len(), "Swept expired limiter keys");
        }

        Ok(f(&mut inner.entries, now))
    }
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn counter(&self) -> u64 {
        match self.value {
            Value::Counter(count) => count,
            Value::Timestamps(_) => 0,
        }
    }
}

fn counter_of(entries: &HashMap<String, Entry>, key: &str) -> u64 {
    entries.get(key).map(Entry::counter).unwrap_or(0)
}

/// INCR semantics; the TTL is set when the key is created or has none
fn increment(entries: &mut HashMap<String, Entry>, key: &str, ttl_ms: u64, now: u64) -> u64 {
    let entry = entries.entry(key.to_string()).or_insert(Entry {
        value: Value::Counter(0),
        expires_at: None,
    });
    let next = entry.counter() + 1;
    entry.value = Value::Counter(next);
    if entry.expires_at.is_none() {
        entry.expires_at = Some(now + ttl_ms);
    }
    next
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn fixed_window(&self, key: &str, limit: u32, window_ms: u64) -> Result<bool, StoreError> {
        self.with_entries(&[key], |entries, now| {
            if counter_of(entries, key) >= u64::from(limit) {
                debug!(key, limit, "Fixed window exhausted");
                return false;
            }
            increment(entries, key, window_ms, now);
            true
        })
    }

    async fn sliding_window(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        self.with_entries(&[key], |entries, now| {
            let entry = entries.entry(key.to_string()).or_insert(Entry {
                value: Value::Timestamps(VecDeque::new()),
                expires_at: None,
            });
            if !matches!(entry.value, Value::Timestamps(_)) {
                entry.value = Value::Timestamps(VecDeque::new());
            }
            entry.expires_at = Some(now + window_ms);

            let Value::Timestamps(timestamps) = &mut entry.value else {
                return false;
            };

            let window_start = now_ms.saturating_sub(window_ms);
            timestamps.retain(|&ts| ts > window_start);

            if timestamps.len() >= limit as usize {
                debug!(key, limit, in_window = timestamps.len(), "Sliding window exhausted");
                return false;
            }
            timestamps.push_back(now_ms);
            true
        })
    }

    async fn brute_force(
        &self,
        keys: &BruteForceKeys,
        limits: BruteForceLimits,
        mode: BruteForceMode,
    ) -> Result<bool, StoreError> {
        self.with_entries(&[keys.attempts.as_str(), keys.lock.as_str()], |entries, now| {
            if mode == BruteForceMode::Reset {
                entries.remove(&keys.attempts);
                entries.remove(&keys.lock);
                return true;
            }

            if entries.contains_key(&keys.lock) {
                return false;
            }

            if mode == BruteForceMode::Check {
                return true;
            }

            let attempts = increment(entries, &keys.attempts, limits.window_ms, now);
            if attempts >= u64::from(limits.max_attempts) {
                entries.insert(
                    keys.lock.clone(),
                    Entry {
                        value: Value::Counter(attempts),
                        expires_at: Some(now + limits.lockout_ms),
                    },
                );
                entries.remove(&keys.attempts);
                return false;
            }
            true
        })
    }
}
