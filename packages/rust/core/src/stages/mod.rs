//! The three batch transforms between the batcher and the flattener.
//!
//! Each stage owns the batch for the duration of one call and hands back the
//! same records, same count, same order:
//! - [`CacheReader`] fills cached results and marks what still needs resolving
//! - [`Geocoder`] resolves the marked records in one service call
//! - [`CacheWriter`] persists fresh results and strips bookkeeping

mod cache_reader;
mod cache_writer;
mod geocoder;

use std::future::Future;

use geoenrich_shared::Result;

use crate::batch::Batch;

pub use cache_reader::CacheReader;
pub use cache_writer::CacheWriter;
pub use geocoder::Geocoder;

/// A 1:1 batch transform.
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Transform one batch. An error is fatal to the run.
    fn process(&self, batch: Batch) -> impl Future<Output = Result<Batch>> + Send;
}
