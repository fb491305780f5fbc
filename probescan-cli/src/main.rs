//! # probescan
//!
//! Scan an integer identifier space against a remote source, persist what
//! it holds into SQLite, and report which stretches were never scanned.
//!
//! ```text
//! probescan scan --config probescan.toml --workers 8
//! probescan scan --resume
//! probescan scan --fill-holes
//! probescan bounds
//! probescan holes --limit 20
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use probescan_core::ids::{Identifier, IdentifierSet};
use probescan_core::probe::HttpProbe;
use probescan_core::scan::Scanner;
use probescan_core::store::schema::Schema;
use probescan_core::store::{Ledger, SqliteScanStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigSource, ProbescanConfig};

#[derive(Parser, Debug)]
#[command(name = "probescan")]
#[command(
    about = "Resumable, gap-aware scanner for enumerable identifier spaces"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML or JSON)
    #[arg(long, global = true, env = "PROBESCAN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true, env = "PROBESCAN_DATABASE")]
    database: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe identifiers and persist the results
    Scan(ScanArgs),
    /// Print the smallest and largest scanned identifier
    Bounds,
    /// Print unscanned gaps in the ledger, smallest first
    Holes {
        /// Print at most this many gaps
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct ScanArgs {
    /// Concurrent probe workers (overrides config)
    #[arg(long, env = "PROBESCAN_WORKERS")]
    workers: Option<usize>,

    /// First identifier to probe (overrides config)
    #[arg(long)]
    start: Option<Identifier>,

    /// Exclusive end of the identifier range (overrides config)
    #[arg(long)]
    end: Option<Identifier>,

    /// Skip identifiers already present in the ledger
    #[arg(long, default_value_t = false, conflicts_with = "fill_holes")]
    resume: bool,

    /// Probe only identifiers inside the ledger's gaps
    #[arg(long, default_value_t = false)]
    fill_holes: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,probescan_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = env_file {
        info!(path = %path.display(), "loaded .env file");
    }

    let (mut config, source) = ProbescanConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    match &source {
        ConfigSource::Path(path) | ConfigSource::File(path) => {
            info!(path = %path.display(), "configuration loaded from file")
        }
        ConfigSource::EnvInline => {
            info!("configuration loaded from inline environment json")
        }
        ConfigSource::Default => info!("no configuration file found; using defaults"),
    }
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    match cli.command {
        Command::Scan(args) => run_scan(config, args).await,
        Command::Bounds => print_bounds(&config.database.path).await,
        Command::Holes { limit } => print_holes(&config.database.path, limit).await,
    }
}

async fn run_scan(
    mut config: ProbescanConfig,
    args: ScanArgs,
) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config.scan.workers = workers;
    }
    if let Some(start) = args.start {
        config.identifiers.start = Some(start);
        config.identifiers.list = None;
    }
    if let Some(end) = args.end {
        config.identifiers.end = Some(end);
        config.identifiers.list = None;
    }

    let endpoint = config
        .probe
        .endpoint
        .clone()
        .context("probe.endpoint is not configured")?;
    let probe = HttpProbe::new(
        endpoint,
        config.probe.key_format()?,
        config.probe.retry,
    )
    .context("failed to build HTTP probe")?;

    let schema =
        Schema::from_config(&config.schema).context("invalid output schema")?;
    let store = SqliteScanStore::open(
        &config.database.path,
        schema,
        config.scan.broadcast,
    )
    .await
    .with_context(|| {
        format!("failed to open database {}", config.database.path.display())
    })?;

    let ids = if args.fill_holes {
        let holes = store.holes().await.context("failed to read ledger gaps")?;
        IdentifierSet::from_holes(&holes)
    } else {
        let ids = config.identifier_set()?;
        if args.resume {
            let checked = store.checked().await.context("failed to read ledger")?;
            ids.without(&checked)
        } else {
            ids
        }
    };
    if ids.is_empty() {
        info!("nothing left to scan");
        store.close().await;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let scanner = Scanner::new(store, Arc::new(probe), config.scan.clone());
    let result = scanner.run(ids, cancel).await;
    scanner.store().close().await;
    let report = result.context("scan aborted")?;

    println!(
        "run {} stopped ({:?}): recorded {}, present {}, rows {}",
        report.run_id,
        report.stop,
        report.recorded,
        report.present,
        report.rows_written
    );

    let failed = report.failures().count();
    if failed > 0 {
        for failure in report.failures() {
            error!(worker = failure.worker, exit = ?failure.exit, "worker failed");
        }
        bail!("{failed} worker(s) failed");
    }
    Ok(())
}

/// First Ctrl-C asks the scan to stop and drain.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; stopping workers and draining results");
                cancel.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for interrupt"),
        }
    });
}

async fn open_ledger(path: &Path) -> anyhow::Result<SqliteScanStore> {
    SqliteScanStore::open_ledger(path)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))
}

async fn print_bounds(path: &Path) -> anyhow::Result<()> {
    let ledger = open_ledger(path).await?;
    let bounds = (ledger.minimum().await?, ledger.maximum().await?);
    ledger.close().await;

    match bounds {
        (Some(min), Some(max)) => println!("{min} {max}"),
        _ => println!("empty"),
    }
    Ok(())
}

async fn print_holes(path: &Path, limit: Option<usize>) -> anyhow::Result<()> {
    let ledger = open_ledger(path).await?;
    let holes = ledger.holes().await?;
    ledger.close().await;

    for hole in holes.iter().take(limit.unwrap_or(usize::MAX)) {
        let (start, end, size) = hole.as_tuple();
        println!("{start} {end} {size}");
    }
    Ok(())
}
