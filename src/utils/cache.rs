//! In-process response cache with request coalescing.
//!
//! Entries are keyed by source, operation and an md5 fingerprint of the
//! normalized subject (identifier or query) plus request parameters. Values are
//! stored as JSON so one cache serves every response type.
//!
//! - Expiry is lazy: an entry past its TTL is dropped when it is next read.
//! - Concurrent misses on the same key share one fetch; the others wait for it
//!   and are counted as hits.
//! - Failed fetches are never stored.
//! - With a capacity set, inserting into a full cache evicts the oldest entry.
//! - A value that fails to (de)serialize is treated as a miss.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::models::SourceKind;
use crate::sources::{Operation, SourceError};

/// Cache key: (source, operation, fingerprint of subject and parameters)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: SourceKind,
    pub operation: Operation,
    fingerprint: String,
}

impl CacheKey {
    /// `subject` is a normalized identifier key or query text
    pub fn new(
        source: SourceKind,
        operation: Operation,
        subject: &str,
        params: &str,
    ) -> Self {
        let subject = subject.split_whitespace().collect::<Vec<_>>().join(" ");
        let input = format!("{}|{}", subject.to_lowercase(), params);
        let digest = md5::compute(input.as_bytes());
        Self {
            source,
            operation,
            fingerprint: format!("{:x}", digest),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    seq: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.inserted_at + self.ttl
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    counters: BTreeMap<(SourceKind, Operation), Counters>,
    next_seq: u64,
}

impl CacheState {
    fn counters(&mut self, key: &CacheKey) -> &mut Counters {
        self.counters
            .entry((key.source, key.operation))
            .or_default()
    }
}

/// Statistics for one (source, operation) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub source: SourceKind,
    pub operation: Operation,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// hits / (hits + misses), 0.0 before any lookup
    pub hit_rate: f64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    /// 0 when unbounded
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub operations: Vec<OperationStats>,
}

impl CacheStats {
    /// Stats for one (source, operation) pair, if it was ever looked up
    pub fn get(&self, source: SourceKind, operation: Operation) -> Option<&OperationStats> {
        self.operations
            .iter()
            .find(|s| s.source == source && s.operation == operation)
    }
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Drops a key's coalescing gate when its holder finishes, is cancelled or times out
struct GateRelease<'a> {
    in_flight: &'a Mutex<HashMap<CacheKey, Gate>>,
    key: &'a CacheKey,
    gate: &'a Gate,
}

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // A later caller may already have installed a fresh gate
        if in_flight.get(self.key).is_some_and(|g| Arc::ptr_eq(g, self.gate)) {
            in_flight.remove(self.key);
        }
    }
}

/// Process-wide response cache
#[derive(Debug)]
pub struct ResponseCache {
    enabled: bool,
    capacity: usize,
    state: Mutex<CacheState>,
    in_flight: Mutex<HashMap<CacheKey, Gate>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ResponseCache {
    /// Create an enabled cache; `capacity` 0 means unbounded
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: true,
            capacity,
            state: Mutex::new(CacheState::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// A cache that stores nothing; every call fetches
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0)
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            tracing::debug!("Response cache enabled, capacity {}", config.capacity);
            Self::new(config.capacity)
        } else {
            tracing::debug!("Response cache is disabled");
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached value for `key`, or run `fetch` once and cache its result
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, SourceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        if !self.enabled {
            return fetch().await;
        }

        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        let gate = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.entry(key.clone()).or_default().clone()
        };
        let _held = gate.lock().await;
        let _gate = GateRelease {
            in_flight: &self.in_flight,
            key: &key,
            gate: &gate,
        };

        // Another caller may have filled the entry while we waited
        if let Some(value) = self.lookup(&key) {
            return Ok(value);
        }

        self.state().counters(&key).misses += 1;
        tracing::debug!(
            "Cache MISS for {} {}",
            key.source.id(),
            key.operation.as_str()
        );

        let result = fetch().await;
        if let Ok(ref value) = result {
            match serde_json::to_value(value) {
                Ok(json) => self.insert(key.clone(), json, ttl),
                Err(e) => tracing::warn!("Failed to serialize cache value: {}", e),
            }
        }

        result
    }

    #[cfg(test)]
    fn pending_fetches(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Live entry for `key`, counting a hit; expired or undecodable entries are dropped
    fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let mut state = self.state();
        let now = Instant::now();

        let value = match state.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        let Some(value) = value else {
            state.entries.remove(key);
            return None;
        };

        match serde_json::from_value::<T>(value) {
            Ok(decoded) => {
                state.counters(key).hits += 1;
                tracing::debug!(
                    "Cache HIT for {} {}",
                    key.source.id(),
                    key.operation.as_str()
                );
                Some(decoded)
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable cache entry: {}", e);
                state.entries.remove(key);
                None
            }
        }
    }

    fn insert(&self, key: CacheKey, value: Value, ttl: Duration) {
        let mut state = self.state();
        let now = Instant::now();

        if self.capacity > 0 && !state.entries.contains_key(&key) {
            state.entries.retain(|_, entry| entry.is_live(now));

            while state.entries.len() >= self.capacity {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(k, _)| k.clone());
                let Some(oldest) = oldest else {
                    break;
                };
                state.entries.remove(&oldest);
                state.counters(&oldest).evictions += 1;
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
                seq,
            },
        );
    }

    /// Drop every entry (statistics are kept)
    pub fn clear(&self) {
        self.state().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of per-(source, operation) statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        let operations: Vec<OperationStats> = state
            .counters
            .iter()
            .map(|((source, operation), c)| {
                let lookups = c.hits + c.misses;
                OperationStats {
                    source: *source,
                    operation: *operation,
                    hits: c.hits,
                    misses: c.misses,
                    evictions: c.evictions,
                    hit_rate: if lookups == 0 {
                        0.0
                    } else {
                        c.hits as f64 / lookups as f64
                    },
                }
            })
            .collect();

        CacheStats {
            enabled: self.enabled,
            entries: state.entries.len(),
            capacity: self.capacity,
            hits: operations.iter().map(|s| s.hits).sum(),
            misses: operations.iter().map(|s| s.misses).sum(),
            operations,
        }
    }
}
