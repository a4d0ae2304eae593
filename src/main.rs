//! locale-bridge
//!
//! Reads newline-delimited JSON records on stdin, converts them between
//! regional formats and writes the results as NDJSON on stdout.
//!
//! ```text
//!   stdin ──▶ StreamProcessor ──▶ stdout
//!                  │
//!                  ├── cache / breaker / retry around the converter
//!                  └── dead-letter queue (summarized on exit)
//! ```
//!
//! Logs go to stderr. SIGINT/SIGTERM stop ingestion; admitted records drain.

use clap::Parser;
use futures_util::stream;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

use locale_bridge::config::{load_config, BridgeConfig};
use locale_bridge::convert::RegionalConverter;
use locale_bridge::lifecycle::signals::trigger_on_signal;
use locale_bridge::observability::{logging, metrics};
use locale_bridge::{Record, Registry, Shutdown, StreamProcessor};

#[derive(Parser)]
#[command(name = "locale-bridge")]
#[command(about = "Convert NDJSON records between regional formats", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one dead-letter reprocessing pass after the input ends
    #[arg(long)]
    reprocess: bool,

    /// Print component statistics as JSON to stderr on exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    logging::init_logging(&config.observability);

    tracing::info!(
        processor = %config.processor.name,
        workers = config.processor.workers,
        max_queue_size = config.processor.max_queue_size,
        "locale-bridge v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Registry::from_config(&config);
    let converter = Arc::new(RegionalConverter::new("regional", config.conversion.clone()));
    let processor = StreamProcessor::from_registry(&config, &registry, converter);

    let shutdown = Shutdown::new();
    tokio::spawn(trigger_on_signal(shutdown.clone()));
    {
        let processor = processor.clone();
        let mut signal = shutdown.subscribe();
        tokio::spawn(async move {
            signal.recv().await;
            processor.stop();
        });
    }
    let maintenance = processor.spawn_maintenance(shutdown.subscribe());

    let (tx, rx) = mpsc::channel(config.processor.max_queue_size.max(1));
    let writer = tokio::spawn(write_records(rx));

    let summary = processor.run(read_records(), tx.clone()).await;

    if cli.reprocess && !processor.is_stopped() {
        processor.reprocess_dead_letters(&tx).await;
    }
    drop(tx);
    if let Err(e) = writer.await? {
        tracing::error!(error = %e, "Failed writing output");
    }

    shutdown.trigger();
    maintenance.await?;

    let dead_letters = processor.dead_letters().stats();
    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        dead_letters = dead_letters.total,
        throughput_per_sec = summary.throughput_per_sec,
        p99_latency_ms = summary.p99_latency_ms,
        "Shutdown complete"
    );

    if cli.stats {
        let report = serde_json::json!({
            "processor": processor.metrics(),
            "cache": processor.cache().stats(),
            "registry": registry.snapshot(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

/// NDJSON records from stdin; malformed lines are logged and skipped.
fn read_records() -> impl futures_util::Stream<Item = Record> {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Record>(&line) {
                    Ok(record) => return Some((record, lines)),
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed input line"),
                },
                Ok(None) => return None,
                Err(e) => {
                    tracing::error!(error = %e, "Failed reading stdin");
                    return None;
                }
            }
        }
    })
}

async fn write_records(mut rx: mpsc::Receiver<Record>) -> std::io::Result<()> {
    let mut out = BufWriter::new(tokio::io::stdout());
    while let Some(record) = rx.recv().await {
        let mut line = serde_json::to_vec(&record).map_err(std::io::Error::from)?;
        line.push(b'\n');
        out.write_all(&line).await?;
    }
    out.flush().await
}
