//! Core enrichment pipeline for Geoenrich.
//!
//! Records stream in, are grouped into batches, resolved against the cache
//! and then the geocoding service, written back to the cache, and stream
//! out again in their original order.

pub mod batch;
pub mod flattener;
pub mod observer;
pub mod pipeline;
pub mod schema;
pub mod stages;

pub use batch::{Batch, BatchStats, Batcher};
pub use observer::{PipelineObserver, RunStats, SilentObserver};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use schema::{FieldDeclaration, FieldKind, declared_fields};
