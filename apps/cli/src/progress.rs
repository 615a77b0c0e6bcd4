//! Terminal progress for enrichment runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use geoenrich_core::PipelineObserver;
use geoenrich_geocodio::GeocodeError;
use indicatif::{ProgressBar, ProgressStyle};

/// Pipeline observer driving an indicatif spinner on stderr.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
    records: AtomicUsize,
    hits: AtomicUsize,
    geocoded: AtomicUsize,
    failures: AtomicUsize,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("waiting for records");
        Self {
            spinner,
            records: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            geocoded: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn refresh(&self, index: usize) {
        let failures = self.failures.load(Ordering::Relaxed);
        let mut msg = format!(
            "batch {index}: {} records, {} cached, {} geocoded",
            self.records.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
            self.geocoded.load(Ordering::Relaxed),
        );
        if failures > 0 {
            msg.push_str(&format!(", {failures} failed calls"));
        }
        self.spinner.set_message(msg);
    }
}

impl PipelineObserver for CliProgress {
    fn batch_started(&self, index: usize, _records: usize) {
        self.refresh(index);
    }

    fn cache_lookup(&self, index: usize, hits: usize, _misses: usize) {
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.refresh(index);
    }

    fn geocoded(&self, index: usize, _requested: usize, resolved: usize) {
        self.geocoded.fetch_add(resolved, Ordering::Relaxed);
        self.refresh(index);
    }

    fn geocode_failed(&self, index: usize, _error: &GeocodeError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.refresh(index);
    }

    fn cache_written(&self, _index: usize, _entries: usize) {}

    fn batch_finished(&self, index: usize, records: usize) {
        self.records.fetch_add(records, Ordering::Relaxed);
        self.refresh(index);
    }
}
