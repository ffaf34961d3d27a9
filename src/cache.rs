//! Bounded reference cache.
//!
//! Weather generation results are stored under opaque handles so that a later
//! model request can refer to them. The cache is a single process-wide map with
//! least-recently-used eviction: `put` and `get` move an entry to the most
//! recent position, `remove` leaves the order of survivors untouched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{lock_err, BioSimResult};

/// Default capacity.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Opaque ASCII handle, unique for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheHandle(String);

impl CacheHandle {
    /// Wraps a client-provided handle string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrows the handle string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct CacheState<V> {
    entries: HashMap<CacheHandle, (Arc<V>, u64)>,
    recency: BTreeMap<u64, CacheHandle>,
    clock: u64,
    issued: u64,
}

impl<V> CacheState<V> {
    fn touch(&mut self, handle: &CacheHandle) -> Option<Arc<V>> {
        self.clock += 1;
        let clock = self.clock;
        let (value, stamp) = self.entries.get_mut(handle)?;
        let previous = std::mem::replace(stamp, clock);
        let value = Arc::clone(value);
        self.recency.remove(&previous);
        self.recency.insert(clock, handle.clone());
        Some(value)
    }
}

/// Capacity-bounded LRU map from opaque handles to shared values.
pub struct ReferenceCache<V> {
    capacity: usize,
    seed: Uuid,
    state: Mutex<CacheState<V>>,
    evictions: AtomicU64,
}

impl<V> ReferenceCache<V> {
    /// Creates a cache holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seed: Uuid::new_v4(),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                clock: 0,
                issued: 0,
            }),
            evictions: AtomicU64::new(0),
        }
    }

    /// Capacity bound.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn mint(&self, state: &mut CacheState<V>) -> CacheHandle {
        loop {
            state.issued += 1;
            let mut hasher = blake3::Hasher::new();
            hasher.update(self.seed.as_bytes());
            hasher.update(&state.issued.to_le_bytes());
            let hex = hasher.finalize().to_hex();
            let handle = CacheHandle(hex.as_str()[..32].to_string());
            if !state.entries.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Stores `value` under a fresh handle at the most recent position, then
    /// evicts least recently used entries while over capacity.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn put(&self, value: V) -> BioSimResult<CacheHandle> {
        let mut state = self.state.lock().map_err(|_| lock_err("reference cache"))?;
        let handle = self.mint(&mut state);
        state.clock += 1;
        let clock = state.clock;
        state.entries.insert(handle.clone(), (Arc::new(value), clock));
        state.recency.insert(clock, handle.clone());

        let mut evicted = 0u64;
        while state.entries.len() > self.capacity {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
            evicted += 1;
        }
        drop(state);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(evicted, capacity = self.capacity, "reference cache evicted entries");
        }
        Ok(handle)
    }

    /// Looks up `handle` and moves it to the most recent position.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn get(&self, handle: &CacheHandle) -> BioSimResult<Option<Arc<V>>> {
        let mut state = self.state.lock().map_err(|_| lock_err("reference cache"))?;
        let found = state.touch(handle);
        if found.is_none() {
            trace!(%handle, "reference cache miss");
        }
        Ok(found)
    }

    /// Looks up every handle, touching the ones found; returns the values in
    /// order, or the list of missing handles.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn get_all(&self, handles: &[CacheHandle]) -> BioSimResult<Result<Vec<Arc<V>>, Vec<CacheHandle>>> {
        let mut state = self.state.lock().map_err(|_| lock_err("reference cache"))?;
        let mut found = Vec::with_capacity(handles.len());
        let mut missing = Vec::new();
        for handle in handles {
            match state.touch(handle) {
                Some(value) => found.push(value),
                None => missing.push(handle.clone()),
            }
        }
        if missing.is_empty() {
            Ok(Ok(found))
        } else {
            Ok(Err(missing))
        }
    }

    /// Removes the given handles; unknown ones are ignored. Returns how many
    /// entries were removed.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn remove(&self, handles: &[CacheHandle]) -> BioSimResult<usize> {
        let mut state = self.state.lock().map_err(|_| lock_err("reference cache"))?;
        let mut removed = 0;
        for handle in handles {
            if let Some((_, stamp)) = state.entries.remove(handle) {
                state.recency.remove(&stamp);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn clear(&self) -> BioSimResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_err("reference cache"))?;
        state.entries.clear();
        state.recency.clear();
        Ok(())
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn len(&self) -> BioSimResult<usize> {
        let state = self.state.lock().map_err(|_| lock_err("reference cache"))?;
        Ok(state.entries.len())
    }

    /// Returns true if the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LockPoisoned` if the cache lock is poisoned.
    pub fn is_empty(&self) -> BioSimResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Total entries evicted so far.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl<V> Default for ReferenceCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<V> fmt::Debug for ReferenceCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len().ok())
            .field("evictions", &self.evictions())
            .finish_non_exhaustive()
    }
}
