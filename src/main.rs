use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use deadlock_adapters::replay::ReplaySource;
use deadlock_adapters::ring_buffer::session_query;
use deadlock_adapters::Poller;
use deadlock_graph::{Assembler, Obfuscator};
use deadlock_sdk::{Collector, FileCheckpoint, Output};
use deadwatch::config::DeadwatchConfig;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "deadwatch")]
#[command(about = "Collect SQL Server deadlock graphs as redacted, size-bounded telemetry")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay deadlock events from a JSON capture
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Append payloads to this file as JSON lines (overrides config)
    #[arg(short, long, conflicts_with = "connect")]
    output: Option<PathBuf>,

    /// Send payloads to a TCP endpoint (host:port, overrides config)
    #[arg(long, conflicts_with = "output")]
    connect: Option<String>,

    /// Run a single collection cycle and exit
    #[arg(long)]
    once: bool,

    /// Print the ring buffer query for the configured session and exit
    #[arg(long)]
    print_query: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = DeadwatchConfig::load(args.config.as_deref())?;

    if args.print_query {
        println!("{}", session_query(&config.session_name)?);
        return Ok(());
    }

    // Live ring buffer reads need a driver-backed QueryExecutor, which this
    // binary does not link.
    let Some(replay) = args.replay.clone() else {
        bail!(
            "No database driver is built into deadwatch; pass --replay <events.json>, \
             or embed deadlock-sdk with a QueryExecutor for your driver"
        );
    };

    let output = select_output(&args, &config);
    info!(
        instance = %config.instance,
        replay = %replay.display(),
        output = %output.description(),
        "Starting deadwatch"
    );

    let mut collector = build_collector(&config, replay, output).await?;

    if args.once {
        let report = collector.run_cycle().await?;
        info!(
            polled = report.polled,
            emitted = report.emitted,
            deferred = report.deferred,
            parse_errors = report.parse_errors,
            "Single cycle complete"
        );
        return Ok(());
    }

    let handle = collector.start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down");
    if let Some(collector) = handle.shutdown().await {
        let status = collector.status();
        info!(
            cycles = status.cycles,
            high_water_mark = %status.high_water_mark,
            "Collector stopped"
        );
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout is reserved for payloads
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// CLI flags win over the config file; stdout when neither names an output.
fn select_output(args: &Args, config: &DeadwatchConfig) -> Output {
    if let Some(path) = &args.output {
        return Output::file(path);
    }
    if let Some(addr) = &args.connect {
        return Output::tcp(addr);
    }
    match (&config.output.file, &config.output.tcp) {
        (Some(path), _) => Output::file(path),
        (None, Some(addr)) => Output::tcp(addr),
        (None, None) => Output::Stdout,
    }
}

async fn build_collector(
    config: &DeadwatchConfig,
    replay: PathBuf,
    output: Output,
) -> Result<Collector> {
    let poller = Poller::new(ReplaySource::new(replay))
        .with_max_rows(config.max_rows)
        .with_timeout(config.query_timeout()?);

    let assembler =
        Assembler::new(Obfuscator::new(config.obfuscation.clone())).with_redaction(config.redact_xml);

    // A capture is replayed from its first event; the lookback bound is
    // relative to now and would drop it.
    if config.max_lookback()?.is_some() {
        debug!("Lookback bound not applied to replayed events");
    }
    let replay_start = Utc
        .timestamp_opt(0, 0)
        .single()
        .context("Invalid replay start")?;

    let mut builder = Collector::builder(config.instance.as_str(), poller)
        .host(config.host())
        .tags(config.tags.clone())
        .enabled(config.enabled)
        .interval(config.collection_interval()?)
        .max_payload_bytes(config.max_payload_bytes)
        .assembler(assembler)
        .output(output)
        .start_at(replay_start);

    if let Some(path) = &config.checkpoint_path {
        builder = builder.checkpoint(FileCheckpoint::new(path));
    }

    Ok(builder.build().await?)
}
