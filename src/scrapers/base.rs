use crate::models::market::{PriceBar, SymbolProfile};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Base trait for daily price providers
#[async_trait]
pub trait PriceScraper {
    /// Short code identifying the provider
    fn provider_code(&self) -> &'static str;

    /// Fetch adjusted daily OHLC bars for a symbol over `[start, end]`,
    /// sorted ascending. An empty vector means the provider has no data for
    /// the range (delisted symbol or no new bars), which is not an error.
    async fn fetch_price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>>;

    /// Fetch quote metadata for a symbol
    async fn fetch_symbol_profile(&self, symbol: &str) -> Result<SymbolProfile>;
}
