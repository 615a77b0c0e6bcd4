//! End-to-end enrichment pipeline:
//! batcher → cache reader → geocoder → cache writer → flattener.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use geoenrich_geocodio::GeocodioClient;
use geoenrich_shared::{
    AddressFields, GeoenrichError, PipelineConfig, Record, Result, StageOptions,
};
use geoenrich_storage::GeocodeCache;

use crate::batch::{Batch, Batcher};
use crate::flattener;
use crate::observer::{PipelineObserver, RunStats, SilentObserver};
use crate::stages::{CacheReader, CacheWriter, Geocoder, Stage};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Pipeline`], validating options before anything runs.
pub struct PipelineBuilder<C> {
    options: StageOptions,
    cache: C,
    client: GeocodioClient,
    config: PipelineConfig,
    observer: Arc<dyn PipelineObserver>,
}

impl<C: GeocodeCache + Clone> PipelineBuilder<C> {
    /// Override the default runtime configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Report batch events to `observer`.
    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate options and config, then wire the stages.
    pub fn build(self) -> Result<Pipeline<C>> {
        self.options.validate()?;
        self.config.validate()?;

        let fields = AddressFields::new(self.options.address.as_str());
        Ok(Pipeline {
            reader: CacheReader::new(self.cache.clone(), fields.clone(), self.observer.clone()),
            geocoder: Geocoder::new(
                self.client,
                fields.clone(),
                self.config.service_timeout,
                self.observer.clone(),
            ),
            writer: CacheWriter::new(
                self.cache,
                fields.clone(),
                self.config.cache_write_failure,
                self.observer.clone(),
            ),
            fields,
            config: self.config,
            observer: self.observer,
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One configured enrichment pipeline.
///
/// A pipeline processes one batch at a time; independent pipelines sharing
/// a cache may run concurrently.
pub struct Pipeline<C> {
    reader: CacheReader<C>,
    geocoder: Geocoder,
    writer: CacheWriter<C>,
    fields: AddressFields,
    config: PipelineConfig,
    observer: Arc<dyn PipelineObserver>,
}

impl<C: GeocodeCache + Clone> Pipeline<C> {
    /// Start building a pipeline for `options` over `cache` and `client`.
    pub fn builder(options: StageOptions, cache: C, client: GeocodioClient) -> PipelineBuilder<C> {
        PipelineBuilder {
            options,
            cache,
            client,
            config: PipelineConfig::default(),
            observer: Arc::new(SilentObserver),
        }
    }
}

impl<C: GeocodeCache> Pipeline<C> {
    /// Output field names derived from the configured address field.
    pub fn fields(&self) -> &AddressFields {
        &self.fields
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one batch through the reader, geocoder, and writer.
    #[instrument(skip_all, fields(batch = batch.index(), records = batch.len()))]
    pub async fn process_batch(&self, batch: Batch) -> Result<Batch> {
        let batch = run_stage(&self.reader, batch).await?;
        let batch = run_stage(&self.geocoder, batch).await?;
        run_stage(&self.writer, batch).await
    }

    /// Consume `input` until it closes, sending enriched records to `output`
    /// in input order.
    ///
    /// Cache errors end the run with an error; geocoding errors do not.
    /// Cancelling `cancel` stops the run at the next suspension point.
    #[instrument(
        skip_all,
        fields(run_id = %Uuid::now_v7(), address_field = %self.fields.address())
    )]
    pub async fn run(
        &self,
        input: mpsc::Receiver<Record>,
        output: mpsc::Sender<Record>,
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        let start = Instant::now();
        let mut batcher = Batcher::new(input, self.config.batch_size);
        let mut stats = RunStats::default();

        info!(batch_size = self.config.batch_size, "starting enrichment run");

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GeoenrichError::Cancelled),
                next = batcher.next_batch() => match next {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let index = batch.index();
            self.observer.batch_started(index, batch.len());

            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GeoenrichError::Cancelled),
                processed = self.process_batch(batch) => processed?,
            };
            let batch_stats = batch.stats;

            let emitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GeoenrichError::Cancelled),
                sent = flattener::emit(batch, &output) => sent?,
            };

            stats.absorb(emitted, &batch_stats);
            self.observer.batch_finished(index, emitted);
        }

        stats.elapsed = start.elapsed();
        info!(
            records = stats.records,
            batches = stats.batches,
            cache_hits = stats.cache_hits,
            geocoded = stats.geocoded,
            geocode_failures = stats.geocode_failures,
            elapsed_ms = stats.elapsed.as_millis(),
            "enrichment run complete"
        );

        Ok(stats)
    }

    /// Run an in-memory record list through the pipeline.
    pub async fn run_records(&self, records: Vec<Record>) -> Result<(Vec<Record>, RunStats)> {
        let (in_tx, in_rx) = mpsc::channel(records.len().max(1));
        for record in records {
            in_tx
                .send(record)
                .await
                .map_err(|_| GeoenrichError::Cancelled)?;
        }
        drop(in_tx);

        let (out_tx, mut out_rx) = mpsc::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();

        let collect = async move {
            let mut out = Vec::new();
            while let Some(record) = out_rx.recv().await {
                out.push(record);
            }
            out
        };

        let (stats, out) = tokio::join!(self.run(in_rx, out_tx, &cancel), collect);
        Ok((out, stats?))
    }
}

/// Run one stage, checking it kept the batch's shape.
async fn run_stage<S: Stage>(stage: &S, batch: Batch) -> Result<Batch> {
    let expected = batch.len();
    let out = stage.process(batch).await?;
    debug_assert_eq!(out.len(), expected, "{} changed batch size", stage.name());
    debug!(stage = stage.name(), records = out.len(), "stage complete");
    Ok(out)
}
