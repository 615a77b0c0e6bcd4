//! Write-through cache stage.

use std::sync::Arc;

use geoenrich_shared::{AddressFields, CacheEntry, CacheWriteFailure, Result};
use geoenrich_storage::GeocodeCache;
use tracing::{debug, warn};

use super::Stage;
use crate::batch::Batch;
use crate::observer::PipelineObserver;

/// Persists freshly geocoded records and strips bookkeeping from all records.
///
/// Bookkeeping is removed before the write is attempted, so it never leaks
/// downstream whatever the write outcome.
pub struct CacheWriter<C> {
    cache: C,
    fields: AddressFields,
    on_failure: CacheWriteFailure,
    observer: Arc<dyn PipelineObserver>,
}

impl<C: GeocodeCache> CacheWriter<C> {
    pub fn new(
        cache: C,
        fields: AddressFields,
        on_failure: CacheWriteFailure,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            cache,
            fields,
            on_failure,
            observer,
        }
    }
}

impl<C: GeocodeCache> Stage for CacheWriter<C> {
    fn name(&self) -> &'static str {
        "cache_writer"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        let entries: Vec<(String, String)> = batch
            .records()
            .iter()
            .filter(|r| r.geocoded())
            .filter_map(|r| {
                let key = r.address(&self.fields)?;
                let entry = CacheEntry::from_record(r, &self.fields)?;
                Some((key, entry.encode()))
            })
            .collect();

        for record in batch.records_mut() {
            record.clear_bookkeeping();
        }

        if entries.is_empty() {
            return Ok(batch);
        }

        match self.cache.set_many(&entries).await {
            Ok(()) => {
                batch.stats.cache_written = entries.len();
                debug!(batch = batch.index(), written = entries.len(), "cache updated");
                self.observer.cache_written(batch.index(), entries.len());
                Ok(batch)
            }
            Err(e) if self.on_failure == CacheWriteFailure::Ignore => {
                warn!(
                    batch = batch.index(),
                    entries = entries.len(),
                    error = %e,
                    "cache write failed, forwarding batch anyway"
                );
                Ok(batch)
            }
            Err(e) => Err(e),
        }
    }
}
