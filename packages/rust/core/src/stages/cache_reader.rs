//! Read-through cache stage.

use std::sync::Arc;

use geoenrich_shared::{AddressFields, CacheEntry, GeoenrichError, Result};
use geoenrich_storage::GeocodeCache;
use tracing::{debug, warn};

use super::Stage;
use crate::batch::Batch;
use crate::observer::PipelineObserver;

/// Looks every addressed record up in the cache and applies hits.
///
/// Records without an address are left untouched and never reach the
/// cache. Everything not satisfied by a usable entry stays marked as
/// requiring geocoding.
pub struct CacheReader<C> {
    cache: C,
    fields: AddressFields,
    observer: Arc<dyn PipelineObserver>,
}

impl<C: GeocodeCache> CacheReader<C> {
    pub fn new(cache: C, fields: AddressFields, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            cache,
            fields,
            observer,
        }
    }
}

impl<C: GeocodeCache> Stage for CacheReader<C> {
    fn name(&self) -> &'static str {
        "cache_reader"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        // Positions of addressed records and their keys, index-aligned.
        let mut positions = Vec::new();
        let mut keys = Vec::new();
        for (i, record) in batch.records_mut().iter_mut().enumerate() {
            let address = record.address(&self.fields);
            record.set_requires_geocode(address.is_some());
            if let Some(address) = address {
                positions.push(i);
                keys.push(address);
            }
        }

        if keys.is_empty() {
            debug!(batch = batch.index(), "no addressed records");
            return Ok(batch);
        }

        let values = self.cache.get_many(&keys).await?;
        if values.len() != keys.len() {
            return Err(GeoenrichError::Cache(format!(
                "cache answered {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        let mut hits = 0;
        let records = batch.records_mut();
        for ((&pos, key), value) in positions.iter().zip(&keys).zip(values) {
            let Some(raw) = value else {
                continue;
            };
            match CacheEntry::decode(&raw) {
                Some(entry) => {
                    let record = &mut records[pos];
                    record.apply_resolution(&self.fields, entry.location, &entry.address);
                    record.set_requires_geocode(false);
                    hits += 1;
                }
                None => warn!(address = %key, "unusable cache entry, will re-resolve"),
            }
        }

        let misses = keys.len() - hits;
        batch.stats.cache_hits = hits;
        batch.stats.cache_misses = misses;
        debug!(batch = batch.index(), hits, misses, "cache lookup");
        self.observer.cache_lookup(batch.index(), hits, misses);

        Ok(batch)
    }
}
