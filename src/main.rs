//! Order Log Reconcile - Main Entry Point
//!
//! Command line tool that collects the symbols a trading bot traded, caches
//! the exchange's order history and reconciles the bot's decision logs
//! against it.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use order_log_reconcile::config::load_config;
use order_log_reconcile::decision_log::scan_symbols;
use order_log_reconcile::reconcile::{run_all, Matcher, Pass};
use order_log_reconcile::store::day_range_ms;
use order_log_reconcile::{fetch_all, OrderStore, SqliteOrderStore};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Order store database file (overrides the configuration)
    #[arg(long)]
    db: Option<String>,

    /// Root directory of the decision logs, one sub-directory per trader
    #[arg(long)]
    decision_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record every (trader, symbol) with a successful open in the logs
    ScanSymbols,
    /// Fetch new orders for every scanned symbol into the store
    FetchOrders,
    /// Correct decision logs in place and complete missing closes
    Reconcile,
    /// Validate partial-close chains (report only)
    PartialCloseReconcile,
    /// Print stored orders of one trader and symbol for one day
    QueryOrders {
        trader: String,
        symbol: String,
        /// Calendar day, YYYY-MM-DD
        date: NaiveDate,
        /// UTC offset of the day in hours
        #[arg(long, default_value_t = 8, allow_hyphen_values = true)]
        tz_offset: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = load_config(Some(&args.config)).context("loading configuration")?;
    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    if let Some(dir) = &args.decision_dir {
        config.settings.decision_dir = dir.clone();
    }

    // Initialize logging
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting order log reconcile: {:?}", args.command);
    info!("Configuration file: {}", args.config);

    let store = SqliteOrderStore::from_config(&config.database)
        .await
        .context("opening order store")?;
    let matcher = Matcher::new(config.reconcile.clone());

    match args.command {
        Command::ScanSymbols => {
            let summary = scan_symbols(&store, &config.settings.decision_dir).await?;
            info!(
                "Scan complete: {} opens, {} (trader, symbol) pairs, {} files skipped",
                summary.open_occurrences, summary.unique_pairs, summary.skipped_files
            );
        }
        Command::FetchOrders => {
            let summary = fetch_all(&store, &config).await?;
            info!(
                "Fetch complete: {} symbols ok, {} failed, {} orders written",
                summary.succeeded, summary.failed, summary.orders_written
            );
        }
        Command::Reconcile => {
            let summary = run_all(&store, &config.settings.decision_dir, &matcher, Pass::Reconcile).await?;
            info!(
                "Reconcile complete: {} traders ok, {} failed, {} reports",
                summary.succeeded,
                summary.failed,
                summary.reports.len()
            );
        }
        Command::PartialCloseReconcile => {
            let summary =
                run_all(&store, &config.settings.decision_dir, &matcher, Pass::PartialClose).await?;
            info!(
                "Partial close reconcile complete: {} traders ok, {} failed, {} reports",
                summary.succeeded,
                summary.failed,
                summary.reports.len()
            );
        }
        Command::QueryOrders {
            trader,
            symbol,
            date,
            tz_offset,
        } => {
            let (start, end) = day_range_ms(date, tz_offset)?;
            let offset = FixedOffset::east_opt(tz_offset * 3600)
                .context("invalid UTC offset")?;
            let orders = store.query_orders_between(&trader, &symbol, start, end).await?;

            println!(
                "found {} orders for {} on {} (tz=UTC{:+})",
                orders.len(),
                symbol,
                date,
                tz_offset
            );
            for o in orders {
                let at = DateTime::from_timestamp_millis(o.time)
                    .map(|t| t.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| o.time.to_string());
                println!(
                    "{} | id={} | {:<4} {:<5} {:<16} | px={} qty={} | RO={} CP={} | {}",
                    at,
                    o.order_id,
                    o.side.to_string(),
                    o.position_side.to_string(),
                    o.status.to_string(),
                    o.fill_price().normalize(),
                    o.executed_qty.normalize(),
                    o.reduce_only,
                    o.close_position,
                    o.order_type
                );
            }
        }
    }

    store.close().await;
    Ok(())
}
