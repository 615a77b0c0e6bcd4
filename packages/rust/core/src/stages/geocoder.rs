//! Remote resolution stage.

use std::sync::Arc;
use std::time::Duration;

use geoenrich_geocodio::{GeocodeError, GeocodedAddress, GeocodioClient};
use geoenrich_shared::{AddressFields, Result};
use tracing::{debug, error};

use super::Stage;
use crate::batch::Batch;
use crate::observer::PipelineObserver;

/// Resolves every record still requiring geocoding with one service call.
///
/// A failed or timed-out call is logged and reported to the observer, and
/// the batch goes on unchanged: this stage never fails a run and never
/// retries.
pub struct Geocoder {
    client: GeocodioClient,
    fields: AddressFields,
    timeout: Duration,
    observer: Arc<dyn PipelineObserver>,
}

impl Geocoder {
    pub fn new(
        client: GeocodioClient,
        fields: AddressFields,
        timeout: Duration,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            client,
            fields,
            timeout,
            observer,
        }
    }

    async fn call(
        &self,
        addresses: &[String],
    ) -> std::result::Result<Vec<Option<GeocodedAddress>>, GeocodeError> {
        tokio::time::timeout(self.timeout, self.client.geocode_batch(addresses))
            .await
            .unwrap_or(Err(GeocodeError::Timeout(self.timeout)))
    }
}

impl Stage for Geocoder {
    fn name(&self) -> &'static str {
        "geocoder"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        let (positions, addresses): (Vec<usize>, Vec<String>) = batch
            .records()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.requires_geocode())
            .filter_map(|(i, r)| r.address(&self.fields).map(|a| (i, a)))
            .unzip();

        if addresses.is_empty() {
            return Ok(batch);
        }

        let index = batch.index();
        batch.stats.geocode_requested = addresses.len();

        let results = match self.call(&addresses).await {
            Ok(results) => results,
            Err(e) => {
                error!(
                    batch = index,
                    addresses = addresses.len(),
                    error = %e,
                    "geocoding failed, forwarding batch without enrichment"
                );
                batch.stats.geocode_failed = true;
                self.observer.geocode_failed(index, &e);
                return Ok(batch);
            }
        };

        let mut resolved = 0;
        let records = batch.records_mut();
        for (&pos, result) in positions.iter().zip(results) {
            let Some(geo) = result else {
                continue;
            };
            let record = &mut records[pos];
            record.mark_geocoded();
            record.apply_resolution(&self.fields, geo.location, &geo.address_components);
            resolved += 1;
        }

        batch.stats.geocoded = resolved;
        debug!(batch = index, requested = addresses.len(), resolved, "geocoded");
        self.observer.geocoded(index, addresses.len(), resolved);

        Ok(batch)
    }
}
