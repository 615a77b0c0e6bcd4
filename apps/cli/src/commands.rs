//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use geoenrich_core::{Pipeline, PipelineObserver, RunStats, SilentObserver, declared_fields};
use geoenrich_geocodio::{GeocodioClient, GeocodioOptions};
use geoenrich_shared::{
    AppConfig, PipelineConfig, StageOptions, init_config, load_config, resolve_api_key,
};
use geoenrich_storage::{GeocodeCache, MemoryCache, Storage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::io;
use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Geoenrich: add coordinates and address components to records.
#[derive(Parser)]
#[command(
    name = "geoenrich",
    version,
    about = "Geocode the address field of NDJSON records in batches, backed by a persistent cache.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Cache backend for a run.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum CacheBackend {
    /// Persistent libSQL database from the config file.
    Sqlite,
    /// In-process map, discarded when the run ends.
    Memory,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Enrich NDJSON records read from a file or stdin.
    Run(RunArgs),

    /// Print the fields a run adds, as JSON schema declarations.
    Fields {
        /// Record field holding the raw address.
        #[arg(short, long)]
        address: String,
    },

    /// Inspect the persistent cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct RunArgs {
    /// Record field holding the raw address.
    #[arg(short, long)]
    address: String,

    /// NDJSON input file (defaults to stdin).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// NDJSON output file (defaults to stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Records per batch; overrides the config file.
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Cache backend.
    #[arg(long, value_enum, default_value = "sqlite")]
    cache: CacheBackend,

    /// Disable the progress spinner.
    #[arg(long)]
    no_progress: bool,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show the cache location and entry count.
    Stats,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "geoenrich=info",
        1 => "geoenrich=debug",
        _ => "geoenrich=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Fields { address } => cmd_fields(address),
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let api_key = resolve_api_key(&config)?;
    let client = GeocodioClient::new(&GeocodioOptions::from_config(&config.geocodio, api_key))?;

    let mut pipeline_config = PipelineConfig::from(&config);
    if let Some(batch_size) = args.batch_size {
        pipeline_config.batch_size = batch_size;
    }

    let options = StageOptions {
        address: args.address.clone(),
    };

    match args.cache {
        CacheBackend::Sqlite => {
            let path = config.cache.resolved_path()?;
            let storage = Storage::open(&path)
                .await?
                .with_collection(config.cache.collection.clone());
            info!(
                path = %path.display(),
                collection = %config.cache.collection,
                "using persistent cache"
            );
            enrich(Arc::new(storage), client, options, pipeline_config, &args).await
        }
        CacheBackend::Memory => {
            info!("using in-memory cache");
            enrich(
                Arc::new(MemoryCache::new()),
                client,
                options,
                pipeline_config,
                &args,
            )
            .await
        }
    }
}

async fn enrich<C: GeocodeCache + Clone>(
    cache: C,
    client: GeocodioClient,
    options: StageOptions,
    config: PipelineConfig,
    args: &RunArgs,
) -> Result<()> {
    let progress = (!args.no_progress).then(|| Arc::new(CliProgress::new()));
    let observer: Arc<dyn PipelineObserver> = match &progress {
        Some(p) => p.clone(),
        None => Arc::new(SilentObserver),
    };

    let pipeline = Pipeline::builder(options, cache, client)
        .config(config)
        .observer(observer)
        .build()?;

    let input = io::open_input(args.input.as_deref()).await?;
    let output = io::open_output(args.output.as_deref()).await?;

    let capacity = pipeline.config().channel_capacity;
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);

    let reader = tokio::spawn(io::read_records(input, in_tx));
    let writer = tokio::spawn(io::write_records(out_rx, output));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let result = pipeline.run(in_rx, out_tx, &cancel).await;
    interrupt.abort();
    if let Some(p) = &progress {
        p.finish();
    }

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            // The reader may be parked on an open stdin.
            reader.abort();
            settle_output(writer).await;
            return Err(e.into());
        }
    };

    let written = writer.await??;
    reader.await??;

    print_summary(&stats, written);
    Ok(())
}

/// Wait for the output writer after a failed run so partial output is
/// flushed. Returns the writer's own failure, which is logged here since the
/// run error takes precedence.
async fn settle_output(writer: JoinHandle<geoenrich_shared::Result<usize>>) -> Option<String> {
    let failure = match writer.await {
        Ok(Ok(written)) => {
            debug!(written, "partial output flushed");
            return None;
        }
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
    };
    warn!(error = %failure, "output writer failed after run error");
    Some(failure)
}

fn print_summary(stats: &RunStats, written: usize) {
    eprintln!();
    eprintln!("  Enrichment complete");
    eprintln!("  Records:  {written}");
    eprintln!("  Batches:  {}", stats.batches);
    eprintln!(
        "  Cache:    {} hits, {} misses",
        stats.cache_hits, stats.cache_misses
    );
    eprintln!(
        "  Geocoded: {} of {} requested",
        stats.geocoded, stats.geocode_requested
    );
    if stats.geocode_failures > 0 {
        eprintln!("  Failed service calls: {}", stats.geocode_failures);
    }
    eprintln!("  Written to cache: {}", stats.cache_written);
    eprintln!("  Time:     {:.1}s", stats.elapsed.as_secs_f64());
    eprintln!();
}

// ---------------------------------------------------------------------------
// fields / cache / config
// ---------------------------------------------------------------------------

fn cmd_fields(address: String) -> Result<()> {
    let options = StageOptions { address };
    options.validate()?;
    println!("{}", serde_json::to_string_pretty(&declared_fields(&options))?);
    Ok(())
}

async fn cmd_cache_stats() -> Result<()> {
    let config = load_config()?;
    let path = config.cache.resolved_path()?;
    if !path.exists() {
        return Err(eyre!(
            "no cache database at '{}'; run `geoenrich run` first",
            path.display()
        ));
    }

    let storage = Storage::open_readonly(&path)
        .await?
        .with_collection(config.cache.collection.clone());
    let entries = storage.count().await?;

    println!("  Path:       {}", path.display());
    println!("  Collection: {}", storage.collection());
    println!("  Entries:    {entries}");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
