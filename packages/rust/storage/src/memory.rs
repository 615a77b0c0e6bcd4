//! In-process cache backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use geoenrich_shared::{GeoenrichError, Result};

use crate::GeocodeCache;

/// A [`GeocodeCache`] backed by a `HashMap`.
///
/// Counts round trips and can be switched into a failing state, which makes
/// it the test double for cache-outage scenarios.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with raw `(key, value)` pairs.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Mutex::new(map),
            ..Self::default()
        }
    }

    /// Number of `get_many` round trips served (failed ones included).
    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set_many` round trips served (failed ones included).
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent reads fail with a cache error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail with a cache error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw stored value for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GeocodeCache for MemoryCache {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GeoenrichError::Cache("simulated read failure".into()));
        }

        let entries = self
            .entries
            .lock()
            .map_err(|_| GeoenrichError::Cache("memory cache lock poisoned".into()))?;
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GeoenrichError::Cache("simulated write failure".into()));
        }

        let mut map = self
            .entries
            .lock()
            .map_err(|_| GeoenrichError::Cache("memory cache lock poisoned".into()))?;
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
