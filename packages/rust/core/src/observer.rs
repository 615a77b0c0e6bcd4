//! Observability hooks for pipeline runs.

use std::time::Duration;

use geoenrich_geocodio::GeocodeError;

use crate::batch::BatchStats;

/// Callback interface reporting what happens to each batch.
///
/// Every method is invoked synchronously from the pipeline task; keep
/// implementations cheap.
pub trait PipelineObserver: Send + Sync {
    /// A batch was admitted by the batcher.
    fn batch_started(&self, index: usize, records: usize);
    /// The cache lookup for a batch finished.
    fn cache_lookup(&self, index: usize, hits: usize, misses: usize);
    /// The geocoding service answered for a batch.
    fn geocoded(&self, index: usize, requested: usize, resolved: usize);
    /// The geocoding call failed; the batch continues unenriched.
    fn geocode_failed(&self, index: usize, error: &GeocodeError);
    /// New entries were written to the cache.
    fn cache_written(&self, index: usize, entries: usize);
    /// Every record of a batch was handed downstream.
    fn batch_finished(&self, index: usize, records: usize);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn batch_started(&self, _index: usize, _records: usize) {}
    fn cache_lookup(&self, _index: usize, _hits: usize, _misses: usize) {}
    fn geocoded(&self, _index: usize, _requested: usize, _resolved: usize) {}
    fn geocode_failed(&self, _index: usize, _error: &GeocodeError) {}
    fn cache_written(&self, _index: usize, _entries: usize) {}
    fn batch_finished(&self, _index: usize, _records: usize) {}
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    /// Records emitted downstream (always equal to records admitted).
    pub records: usize,
    pub batches: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub geocode_requested: usize,
    pub geocoded: usize,
    /// Batches whose service call failed.
    pub geocode_failures: usize,
    pub cache_written: usize,
    pub elapsed: Duration,
}

impl RunStats {
    pub(crate) fn absorb(&mut self, records: usize, batch: &BatchStats) {
        self.records += records;
        self.batches += 1;
        self.cache_hits += batch.cache_hits;
        self.cache_misses += batch.cache_misses;
        self.geocode_requested += batch.geocode_requested;
        self.geocoded += batch.geocoded;
        self.geocode_failures += usize::from(batch.geocode_failed);
        self.cache_written += batch.cache_written;
    }
}
