//! knsindex CLI: run the KNS indexer and inspect its state.
//!
//! Usage:
//! ```bash
//! knsindex run    [--once] [--json-logs]
//! knsindex status
//! knsindex info
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use knsindex_core::indexer::IndexerConfig;
use knsindex_core::store::{ProjectionStore, UsernameQuery};
use knsindex_keeta::{HttpLedgerClient, IndexerBuilder};
use knsindex_storage::postgres::PostgresStorage;
use knsindex_storage::sqlite::SqliteStorage;

#[derive(Parser)]
#[command(
    name = "knsindex",
    about = "Keeta Name Service indexer",
    long_about = "
Indexes KNS username inscriptions from the Keeta ledger into a relational
projection (tables `settings` and `username`).

ENVIRONMENT VARIABLES:
  DATABASE_URL           postgres://... or sqlite:...
  KEETA_BASE_URL         Keeta node serving /api/node/ledger/history
  KEETOOLS_BASE_URL      Keetools API serving /api/staples/metadata
  KNS_POLL_INTERVAL_MS   Sleep between cycles (default 1000)
  RUST_LOG               Log filter (default info)
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct StoreArgs {
    /// Database URL (`postgres://...` or `sqlite:...`)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the indexer until Ctrl-C
    Run {
        #[command(flatten)]
        store: StoreArgs,
        /// Base URL of the ledger history service
        #[arg(long, env = "KEETA_BASE_URL")]
        keeta_base_url: Option<String>,
        /// Base URL of the staple metadata service
        #[arg(long, env = "KEETOOLS_BASE_URL")]
        keetools_base_url: Option<String>,
        /// Sleep between successful cycles (milliseconds)
        #[arg(long, env = "KNS_POLL_INTERVAL_MS")]
        poll_interval_ms: Option<u64>,
        /// Process one page and exit
        #[arg(long)]
        once: bool,
        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the stored checkpoint
    Status {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Print protocol constants and defaults
    Info,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            store,
            keeta_base_url,
            keetools_base_url,
            poll_interval_ms,
            once,
            json_logs,
        } => {
            init_tracing(json_logs);
            let mut builder = IndexerBuilder::new();
            if let Some(url) = keeta_base_url {
                builder = builder.history_base_url(url);
            }
            if let Some(url) = keetools_base_url {
                builder = builder.metadata_base_url(url);
            }
            if let Some(ms) = poll_interval_ms {
                builder = builder.poll_interval_ms(ms);
            }

            if is_sqlite(&store.database_url) {
                let db = SqliteStorage::open(&store.database_url)
                    .await
                    .context("opening SQLite store")?;
                cmd_run(builder, db, once).await
            } else {
                let db = PostgresStorage::connect(&store.database_url)
                    .await
                    .context("connecting to Postgres")?;
                cmd_run(builder, db, once).await
            }
        }
        Commands::Status { store } => {
            if is_sqlite(&store.database_url) {
                cmd_status(&SqliteStorage::open(&store.database_url).await?).await
            } else {
                cmd_status(&PostgresStorage::connect(&store.database_url).await?).await
            }
        }
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn is_sqlite(url: &str) -> bool {
    url.starts_with("sqlite:")
}

async fn cmd_run<S: ProjectionStore>(builder: IndexerBuilder, store: S, once: bool) -> Result<()> {
    let client = HttpLedgerClient::new(builder.config())?;
    let mut index_loop = builder.build(client, store)?;

    if once {
        let report = index_loop.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            token.cancel();
        }
    });

    index_loop.run(cancel).await?;
    Ok(())
}

async fn cmd_status<S: ProjectionStore>(store: &S) -> Result<()> {
    let cp = store.load_checkpoint().await?;
    let total = store.usernames(&UsernameQuery::default()).await?.total;

    println!("Checkpoint");
    println!("  Page:            {}", cp.page);
    match (cp.last_block_timestamp, cp.last_block_hash) {
        (Some(ts), Some(hash)) => {
            println!("  Last block:      {hash}");
            println!("  Last block time: {}", ts.to_rfc3339());
        }
        _ => println!("  Last block:      (none)"),
    }
    println!("Usernames:         {total}");
    Ok(())
}

fn cmd_info() {
    let cfg = IndexerConfig::default();
    println!("knsindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Token name:        {}", cfg.token_name);
    println!("  Burn address:      {}", cfg.burn_address);
    println!("  Launch date:       {}", cfg.launch_date);
    println!("  Page limit:        {}", cfg.page_limit);
    println!("  History service:   {}", cfg.history_base_url);
    println!("  Metadata service:  {}", cfg.metadata_base_url);
    println!("  Poll interval:     {} ms", cfg.poll_interval_ms);
    println!("  Failure delay:     {} ms", cfg.failure_delay_ms);
    println!("  Username pattern:  {}", cfg.username_pattern);
    println!("  Storage backends:  memory, SQLite, PostgreSQL");
}
