use shortvol::config::{Config, RetryPolicy};
use shortvol::scrapers::base::PriceScraper;
use shortvol::scrapers::finra::FinraScraper;
use shortvol::scrapers::yahoo::YahooScraper;
use shortvol::services::update_service::{SymbolOutcome, UpdateService};

use anyhow::Result;
use chrono::NaiveDate;
use clap::{App, Arg};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let app = App::new("shortvol")
        .version("0.3.1")
        .about("Daily OHLC and short sale volume collection for Nasdaq/NYSE listed stocks")
        .arg(
            Arg::with_name("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory for all collected data")
                .takes_value(true)
                .default_value("data"),
        )
        .arg(
            Arg::with_name("symbol")
                .short('s')
                .long("symbol")
                .value_name("SYMBOL")
                .help("Update a single symbol instead of the full list")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("start")
                .long("start")
                .value_name("DATE")
                .help("History start date (YYYY-MM-DD)")
                .takes_value(true)
                .default_value("2011-03-01"),
        )
        .arg(
            Arg::with_name("force-full")
                .short('f')
                .long("force-full")
                .help("Refetch full price history even when incremental data exists")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("skip-profiles")
                .long("skip-profiles")
                .help("Skip the symbol profile download")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("max-attempts")
                .long("max-attempts")
                .value_name("N")
                .help("Provider request attempts before a request is marked failed")
                .takes_value(true)
                .default_value("3"),
        )
        .arg(
            Arg::with_name("retry-backoff")
                .long("retry-backoff")
                .value_name("MILLIS")
                .help("Base backoff between retry attempts")
                .takes_value(true)
                .default_value("500"),
        );

    // Debug arguments are only available in development builds
    #[cfg(debug_assertions)]
    let app = app
        .arg(
            Arg::with_name("debug")
                .long("debug")
                .help("Enable debug mode")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("debug-limit")
                .long("debug-limit")
                .help("Limit the number of symbols to process in debug mode")
                .takes_value(true)
                .default_value("10"),
        );

    let matches = app.get_matches();

    #[cfg(debug_assertions)]
    let debug_mode = matches.is_present("debug");
    #[cfg(not(debug_assertions))]
    let debug_mode = false;

    #[cfg(debug_assertions)]
    let debug_limit = matches
        .value_of("debug-limit")
        .unwrap_or("10")
        .parse::<usize>()
        .unwrap_or(10);
    #[cfg(not(debug_assertions))]
    let debug_limit = usize::MAX;

    let history_start = NaiveDate::parse_from_str(matches.value_of("start").unwrap(), "%Y-%m-%d")?;
    let max_attempts = matches
        .value_of("max-attempts")
        .unwrap_or("3")
        .parse::<u32>()
        .unwrap_or(3);
    let backoff_ms = matches
        .value_of("retry-backoff")
        .unwrap_or("500")
        .parse::<u64>()
        .unwrap_or(500);

    let config = Config::new()
        .with_data_dir(matches.value_of("data-dir").unwrap())
        .with_history_start(history_start)
        .with_debug_mode(debug_mode)
        .with_debug_symbol_limit(debug_limit)
        .with_force_full_history(matches.is_present("force-full"))
        .with_retry(RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(backoff_ms),
        });

    let finra = FinraScraper::new(&config)?;
    let prices: Arc<dyn PriceScraper + Send + Sync> = Arc::new(YahooScraper::new(&config)?);
    let skip_profiles = matches.is_present("skip-profiles");
    let single_symbol = matches.value_of("symbol").map(|s| s.to_uppercase());

    let service = UpdateService::new(config, finra, prices);

    // The archive underpins the symbol list; a failure here is only fatal
    // when no archive exists at all, which update_symbols reports below.
    if let Err(e) = service.update_short_sales().await {
        error!("short sale archive update failed: {}", e);
    }

    if let Some(symbol) = single_symbol {
        match service.update_single_symbol(&symbol).await? {
            SymbolOutcome::Updated { rows } => info!("fetched {} ({} new rows)", symbol, rows),
            SymbolOutcome::UpToDate => info!("up to date {}", symbol),
            SymbolOutcome::NoData => info!("no data {}", symbol),
        }
        return Ok(());
    }

    // Per-symbol failures are reported, not fatal: the run still exits 0.
    let summary = service.update_symbols().await?;
    summary.log();

    if !skip_profiles {
        if let Err(e) = service.update_profiles().await {
            error!("profile update failed: {}", e);
        }
    }

    Ok(())
}
