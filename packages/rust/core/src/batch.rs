//! Batches and the batcher that cuts a record stream into them.

use geoenrich_shared::Record;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Per-batch counters filled in by the stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Addresses satisfied from the cache.
    pub cache_hits: usize,
    /// Addresses missing from the cache or stored unparsable.
    pub cache_misses: usize,
    /// Addresses sent to the geocoding service.
    pub geocode_requested: usize,
    /// Addresses the service resolved.
    pub geocoded: usize,
    /// Whether the service call failed for this batch.
    pub geocode_failed: bool,
    /// Entries written back to the cache.
    pub cache_written: usize,
}

/// An ordered group of records travelling through the pipeline together.
///
/// Stages may rewrite records in place but never add, drop, or reorder them.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    index: usize,
    records: Vec<Record>,
    pub stats: BatchStats,
}

impl Batch {
    pub fn new(index: usize, records: Vec<Record>) -> Self {
        Self {
            index,
            records,
            stats: BatchStats::default(),
        }
    }

    /// Zero-based position of this batch within its run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

// ---------------------------------------------------------------------------
// Batcher
// ---------------------------------------------------------------------------

/// Groups an incoming record stream into batches of at most `size` records.
///
/// Input order is preserved; only the final batch may be short. The batcher
/// holds no more than one batch worth of records at a time.
pub struct Batcher {
    input: mpsc::Receiver<Record>,
    size: usize,
    next_index: usize,
    exhausted: bool,
}

impl Batcher {
    /// `size` is clamped to at least 1.
    pub fn new(input: mpsc::Receiver<Record>, size: usize) -> Self {
        Self {
            input,
            size: size.max(1),
            next_index: 0,
            exhausted: false,
        }
    }

    /// Wait for the next full batch, or the remainder once the input closes.
    /// Returns `None` after the last batch.
    pub async fn next_batch(&mut self) -> Option<Batch> {
        if self.exhausted {
            return None;
        }

        let mut records = Vec::with_capacity(self.size);
        while records.len() < self.size {
            let limit = self.size - records.len();
            if self.input.recv_many(&mut records, limit).await == 0 {
                self.exhausted = true;
                break;
            }
        }

        if records.is_empty() {
            return None;
        }

        let batch = Batch::new(self.next_index, records);
        self.next_index += 1;
        Some(batch)
    }
}
