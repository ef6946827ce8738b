mod aggregate;
mod backfill;
mod dashboard;
mod error;
mod history;
mod metrics;
mod movement;
mod pipeline;
mod quotes;
mod report;
mod sectors;
mod storage_utils;
mod symbols;

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::storage_utils::{AppConfig, AsyncStorageManager};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console modes log to stderr. The dashboard owns the terminal, so its
/// logs go to `tracker.log` in the storage directory instead.
fn init_logging(storage: &AsyncStorageManager, to_file: bool) -> anyhow::Result<()> {
    if to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(storage.path("tracker.log"))?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

async fn track(storage: &AsyncStorageManager, config: &AppConfig) -> anyhow::Result<()> {
    let date = pipeline::today();

    // Step 1-3: symbols, quotes, aggregate + persist
    println!("\n--- Step 1: Tracking Market Movement for {} ---", date);
    let run = match pipeline::run_daily_tracking(storage, config, date).await {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Error tracking movements: {:#}", e);
            return Err(e);
        }
    };
    println!(
        "Successfully processed {} out of {} stocks",
        run.details.len(),
        run.symbols_requested
    );

    // Step 2: Daily summary
    println!("\n--- Step 2: Daily Summary ---");
    report::print_daily_summary(&run.record, run.failures.len());
    if !run.details.is_empty() {
        println!("\nTop movers");
        println!("{}", report::top_movers_table(&run.details, 5));
    }
    report::print_sector_summary(
        &run.sectors,
        config.report.sector_rows,
        config.report.sector_min_stocks,
    );

    // Step 3: Trend report
    println!("\n--- Step 3: Trend Report ---");
    print_history_report(storage, config).await
}

async fn backfill(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    days_back: u32,
) -> anyhow::Result<()> {
    println!("\n--- Step 1: Backfilling Last {} Days ---", days_back);
    let records = pipeline::run_backfill(storage, config, pipeline::today(), days_back).await?;
    println!("Total days processed: {}", records.len());

    println!("\n--- Step 2: Trend Report ---");
    print_history_report(storage, config).await
}

async fn print_history_report(
    storage: &AsyncStorageManager,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let store = pipeline::history_store(storage, config);
    let records = store.load_all().await?;
    report::print_report(
        &records,
        config.report.history_rows,
        config.report.moving_average_window,
    )?;

    if let Some(latest) = records.last() {
        if let Some(details) = store.load_details(latest.date).await? {
            if !details.is_empty() {
                println!("\nTop movers on {}", latest.date);
                println!("{}", report::top_movers_table(&details, 5));
            }
        }
    }

    report::print_sector_summary(
        &sectors::latest_day(&store.load_sectors().await?),
        config.report.sector_rows,
        config.report.sector_min_stocks,
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("track");

    let storage = pipeline::open_storage().await?;
    init_logging(&storage, mode == "dashboard")?;
    let config = storage.load_config().await?;

    match mode {
        "track" => track(&storage, &config).await,
        "backfill" => {
            let days_back = match args.get(1) {
                Some(days) => days.parse()?,
                None => config.backfill.days_back,
            };
            backfill(&storage, &config, days_back).await
        }
        "report" => print_history_report(&storage, &config).await,
        "dashboard" => dashboard::run_dashboard(storage, config).await,
        other => {
            eprintln!("Unknown mode '{}'. Use: track | backfill [DAYS] | report | dashboard", other);
            std::process::exit(2);
        }
    }
}
