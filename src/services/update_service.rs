use crate::config::Config;
use crate::errors::{Result, ShortvolError};
use crate::models::market::{DailyRecord, PriceBar, ShortTotals, SymbolSeries};
use crate::scrapers::base::PriceScraper;
use crate::scrapers::finra::FinraScraper;
use crate::store::{ProfileStore, SeriesStore, ShortSaleArchive};
use crate::util;
use chrono::{Duration, Local, NaiveDate, Utc};
use chrono_tz::US::Eastern;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of processing one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// New records were merged and the series rewritten.
    Updated { rows: usize },
    /// No trading day lies between the stored history and the end bound.
    UpToDate,
    /// The provider returned nothing for the missing range; storage is
    /// left untouched.
    NoData,
}

/// What happened to each symbol over a full run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub updated: Vec<String>,
    pub up_to_date: Vec<String>,
    pub no_data: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            "{} updated, {} up to date, {} without data, {} failed",
            self.updated.len(),
            self.up_to_date.len(),
            self.no_data.len(),
            self.failed.len()
        );
        for (symbol, reason) in &self.failed {
            warn!("failed {}: {}", symbol, reason);
        }
    }
}

/// Update service: archive refresh, per-symbol fetch-and-merge, profiles.
pub struct UpdateService {
    config: Config,
    finra: FinraScraper,
    prices: Arc<dyn PriceScraper + Send + Sync>,
    archive: ShortSaleArchive,
    series: SeriesStore,
    profiles: ProfileStore,
}

impl UpdateService {
    pub fn new(
        config: Config,
        finra: FinraScraper,
        prices: Arc<dyn PriceScraper + Send + Sync>,
    ) -> Self {
        let archive = ShortSaleArchive::new(config.short_sale_path());
        let series = SeriesStore::new(config.series_dir());
        let profiles = ProfileStore::new(config.profiles_path());
        Self {
            config,
            finra,
            prices,
            archive,
            series,
            profiles,
        }
    }

    /// Bring the short sale archive up to the newest published date.
    pub async fn update_short_sales(&self) -> Result<()> {
        let start = match self.archive.last_date()? {
            Some(last) => last + Duration::days(1),
            None => self.config.history_start,
        };
        let end = util::latest_published_date(Utc::now().with_timezone(&Eastern));

        let dates = util::trading_dates(start, end);
        if dates.is_empty() {
            info!("short sale archive up to date");
            return Ok(());
        }

        info!(
            "updating short sale archive: {} trading days through {}",
            dates.len(),
            end
        );
        for date in dates {
            match self.finra.fetch_short_sale_day(date).await? {
                Some(records) => {
                    self.archive.append_day(&records)?;
                    info!("fetched {} short sale rows for {}", records.len(), date);
                }
                None => info!("market closed {}", date),
            }
        }
        info!("short sale archive up to date");
        Ok(())
    }

    /// Fetch-and-merge across every sourced symbol, sequentially.
    ///
    /// Per-symbol failures are recorded in the summary and never stop the
    /// loop; only a failure to source the symbol list aborts.
    pub async fn update_symbols(&self) -> Result<RunSummary> {
        let by_symbol = self.archive.load_by_symbol()?;

        let mut symbols: Vec<&String> = by_symbol.keys().collect();
        if self.config.debug_mode {
            let original = symbols.len();
            symbols.truncate(self.config.debug_symbol_limit);
            info!(
                "DEBUG MODE: processing only {} out of {} symbols",
                symbols.len(),
                original
            );
        }
        info!(
            "processing {} symbols via {}",
            symbols.len(),
            self.prices.provider_code()
        );

        let mut summary = RunSummary::default();
        for symbol in symbols {
            match self.process_symbol(symbol, &by_symbol[symbol]).await {
                Ok(SymbolOutcome::Updated { rows }) => {
                    info!("fetched {} ({} new rows)", symbol, rows);
                    summary.updated.push(symbol.clone());
                }
                Ok(SymbolOutcome::UpToDate) => {
                    info!("up to date {}", symbol);
                    summary.up_to_date.push(symbol.clone());
                }
                Ok(SymbolOutcome::NoData) => {
                    info!("no data {}", symbol);
                    summary.no_data.push(symbol.clone());
                }
                Err(e) => {
                    warn!("skipped {}: {}", symbol, e);
                    summary.failed.push((symbol.clone(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Process one symbol by name (the `--symbol` path).
    pub async fn update_single_symbol(&self, symbol: &str) -> Result<SymbolOutcome> {
        let by_symbol = self.archive.load_by_symbol()?;
        let empty = BTreeMap::new();
        let shorts = by_symbol.get(symbol).unwrap_or(&empty);
        self.process_symbol(symbol, shorts).await
    }

    /// Load existing history, compute the missing range, fetch, join the
    /// short sale totals, merge, persist.
    async fn process_symbol(
        &self,
        symbol: &str,
        shorts: &BTreeMap<NaiveDate, ShortTotals>,
    ) -> Result<SymbolOutcome> {
        let existing = match self.series.load(symbol) {
            Ok(series) => series,
            Err(ShortvolError::ParseError(reason)) => {
                warn!(
                    "unreadable series for {}: {}; refetching full history",
                    symbol, reason
                );
                None
            }
            Err(e) => return Err(e),
        };

        let end = Local::now().date_naive();
        let start = match &existing {
            Some(series) if !self.config.force_full_history => match series.last_date() {
                Some(last) => last + Duration::days(1),
                None => self.config.history_start,
            },
            _ => self.config.history_start,
        };

        if start >= end || util::trading_dates(start, end).is_empty() {
            return Ok(SymbolOutcome::UpToDate);
        }

        let bars = self.prices.fetch_price_history(symbol, start, end).await?;
        if bars.is_empty() {
            return Ok(SymbolOutcome::NoData);
        }

        let incoming = join_short_volume(&bars, shorts);
        let rows = incoming.len();

        let mut series = existing.unwrap_or_else(|| SymbolSeries::new(symbol));
        series.merge(incoming);
        self.series.save(&series)?;

        Ok(SymbolOutcome::Updated { rows })
    }

    /// Fetch quote metadata for symbols that have no profile row yet.
    /// Failures are skipped; this phase never aborts the run.
    pub async fn update_profiles(&self) -> Result<()> {
        let by_symbol = self.archive.load_by_symbol()?;
        let existing = self.profiles.symbols()?;

        let missing: Vec<&String> = by_symbol
            .keys()
            .filter(|symbol| !existing.contains(*symbol))
            .collect();
        if missing.is_empty() {
            info!("symbol profiles up to date");
            return Ok(());
        }

        info!("fetching {} symbol profiles", missing.len());
        for symbol in missing {
            match self.prices.fetch_symbol_profile(symbol).await {
                Ok(profile) => {
                    self.profiles.append(&profile)?;
                    info!("fetched profile {}", symbol);
                }
                Err(e) => warn!("skipped profile {}: {}", symbol, e),
            }
        }
        Ok(())
    }
}

/// Join fetched bars with per-date short sale totals. A date with no short
/// sale row gets zero volumes.
fn join_short_volume(
    bars: &[PriceBar],
    shorts: &BTreeMap<NaiveDate, ShortTotals>,
) -> Vec<DailyRecord> {
    bars.iter()
        .map(|bar| DailyRecord::from_bar(bar, shorts.get(&bar.date).copied().unwrap_or_default()))
        .collect()
}
