use crate::config::{Config, RetryPolicy};
use crate::errors::{Result, ShortvolError};
use crate::models::market::{PriceBar, SymbolProfile};
use crate::scrapers::base::PriceScraper;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const QUOTE_URL: &str = "https://query2.finance.yahoo.com/v7/finance/quote";

/// Yahoo Finance daily price scraper
///
/// The chart API is unofficial and the response is treated as untrusted:
/// missing keys, null rows, and error payloads are all tolerated.
pub struct YahooScraper {
    client: Client,
    retry: RetryPolicy,
    min_request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl YahooScraper {
    pub fn new(config: &Config) -> Result<Self> {
        // Yahoo rejects the default reqwest user agent
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ShortvolError::RequestError(e))?;

        Ok(Self {
            client,
            retry: config.retry,
            min_request_interval: config.min_request_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Wait out the minimum interval between consecutive requests
    async fn wait_for_rate_limit(&self) {
        let now = Instant::now();
        let should_wait = {
            let mut last = self.last_request.lock().unwrap();
            let should_wait = if let Some(instant) = *last {
                let elapsed = instant.elapsed();
                if elapsed < self.min_request_interval {
                    Some(self.min_request_interval - elapsed)
                } else {
                    None
                }
            } else {
                None
            };
            *last = Some(now);
            should_wait
        };

        if let Some(wait_time) = should_wait {
            debug!("waiting {:?} before next request", wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)], symbol: &str) -> Result<Value> {
        let mut last_error: Option<ShortvolError> = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }

            match self.client.get(url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        // Rate limited; retried under the policy, then
                        // surfaced like any other per-symbol fetch failure.
                        last_error = Some(ShortvolError::FetchError(format!(
                            "HTTP 429 rate limited for {}",
                            symbol
                        )));
                        continue;
                    }
                    // 404 carries the "Not Found" error payload for unknown
                    // symbols and is handled by the response parser.
                    if !status.is_success() && status != StatusCode::NOT_FOUND {
                        last_error = Some(ShortvolError::FetchError(format!(
                            "HTTP {} for {}",
                            status, symbol
                        )));
                        continue;
                    }

                    let text = response.text().await?;
                    return serde_json::from_str(&text).map_err(|e| {
                        ShortvolError::FetchError(format!(
                            "malformed response for {}: {}",
                            symbol, e
                        ))
                    });
                }
                Err(e) => {
                    if e.is_timeout() || e.is_connect() {
                        last_error = Some(ShortvolError::RequestError(e));
                    } else {
                        return Err(ShortvolError::RequestError(e));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ShortvolError::FetchError(format!("max retries exceeded for {}", symbol))
        }))
    }

    /// Parse a chart API response into daily bars, ascending by date.
    ///
    /// OHLC values are scaled by adjclose/close so the series is split and
    /// dividend adjusted. Null rows (non-trading days) are skipped. A
    /// "Not Found" error payload or an empty result means no data, not an
    /// error.
    fn parse_chart(symbol: &str, json: &Value) -> Result<Vec<PriceBar>> {
        let chart = json.get("chart").ok_or_else(|| {
            ShortvolError::FetchError(format!("unexpected chart response for {}", symbol))
        })?;

        if let Some(error) = chart.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(|c| c.as_str()).unwrap_or_default();
            if code == "Not Found" {
                return Ok(Vec::new());
            }
            let description = error
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default();
            return Err(ShortvolError::FetchError(format!(
                "{} for {}: {}",
                code, symbol, description
            )));
        }

        let data = match chart
            .get("result")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
        {
            Some(data) => data,
            None => return Ok(Vec::new()),
        };

        // A response for a range with no bars has no timestamp key
        let timestamps = match data.get("timestamp").and_then(|t| t.as_array()) {
            Some(timestamps) => timestamps,
            None => return Ok(Vec::new()),
        };

        let quote = match data
            .get("indicators")
            .and_then(|i| i.get("quote"))
            .and_then(|q| q.as_array())
            .and_then(|q| q.first())
        {
            Some(quote) => quote,
            None => return Ok(Vec::new()),
        };

        let adjclose = data
            .get("indicators")
            .and_then(|i| i.get("adjclose"))
            .and_then(|a| a.as_array())
            .and_then(|a| a.first())
            .and_then(|a| a.get("adjclose"))
            .and_then(|a| a.as_array());

        let mut bars = Vec::new();
        for (i, ts) in timestamps.iter().enumerate() {
            let ts = match ts.as_i64() {
                Some(ts) => ts,
                None => continue,
            };
            let date = match chrono::DateTime::from_timestamp(ts, 0) {
                Some(dt) => dt.naive_utc().date(),
                None => continue,
            };

            let field = |name: &str| {
                quote
                    .get(name)
                    .and_then(|v| v.as_array())
                    .and_then(|v| v.get(i))
                    .and_then(|v| v.as_f64())
            };

            let (open, high, low, close) =
                match (field("open"), field("high"), field("low"), field("close")) {
                    (Some(open), Some(high), Some(low), Some(close)) => (open, high, low, close),
                    _ => continue,
                };

            let factor = adjclose
                .and_then(|a| a.get(i))
                .and_then(|v| v.as_f64())
                .map(|adj| if close != 0.0 { adj / close } else { 1.0 })
                .unwrap_or(1.0);

            bars.push(PriceBar {
                date,
                open: (open * factor) as f32,
                high: (high * factor) as f32,
                low: (low * factor) as f32,
                close: (close * factor) as f32,
            });
        }

        bars.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(bars)
    }

    fn parse_quote(symbol: &str, json: &Value) -> Result<SymbolProfile> {
        let quote = json
            .get("quoteResponse")
            .and_then(|q| q.get("result"))
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
            .ok_or_else(|| {
                ShortvolError::FetchError(format!("no quote data for {}", symbol))
            })?;

        let text = |name: &str| {
            quote
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        Ok(SymbolProfile {
            symbol: symbol.to_string(),
            long_name: text("longName"),
            short_name: text("shortName"),
            exchange: text("fullExchangeName"),
            market: text("market"),
            currency: text("currency"),
            quote_type: text("quoteType"),
        })
    }
}

#[async_trait]
impl PriceScraper for YahooScraper {
    fn provider_code(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        debug!("fetching {} daily bars {} - {}", symbol, start, end);
        self.wait_for_rate_limit().await;

        let start_ts = start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        let end_ts = end.and_hms_opt(23, 59, 59).unwrap().and_utc().timestamp();

        let url = format!("{}/{}", CHART_URL, symbol);
        let query = [
            ("period1", start_ts.to_string()),
            ("period2", end_ts.to_string()),
            ("interval", "1d".to_string()),
            ("includeAdjustedClose", "true".to_string()),
        ];

        let json = self.get_json(&url, &query, symbol).await?;
        let bars = Self::parse_chart(symbol, &json)?;
        debug!("got {} bars for {}", bars.len(), symbol);
        Ok(bars)
    }

    async fn fetch_symbol_profile(&self, symbol: &str) -> Result<SymbolProfile> {
        self.wait_for_rate_limit().await;

        let query = [("symbols", symbol.to_string())];
        let json = self.get_json(QUOTE_URL, &query, symbol).await?;
        Self::parse_quote(symbol, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart_fixture() -> Value {
        // 2021-06-01 and 2021-06-02 market-open timestamps, with a null row
        // between them, and a 2:1 adjustment on the first bar.
        json!({
            "chart": {
                "result": [{
                    "timestamp": [1622554200, 1622640600, 1622727000],
                    "indicators": {
                        "quote": [{
                            "open":  [10.0, null, 12.0],
                            "high":  [11.0, null, 13.0],
                            "low":   [9.0,  null, 11.0],
                            "close": [10.0, null, 12.0],
                            "volume": [1000, null, 2000]
                        }],
                        "adjclose": [{
                            "adjclose": [5.0, null, 12.0]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn parses_bars_and_applies_adjustment() {
        let bars = YahooScraper::parse_chart("ABC", &chart_fixture()).unwrap();
        assert_eq!(bars.len(), 2);

        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2021, 6, 1).unwrap());
        assert_eq!(bars[0].open, 5.0); // scaled by adjclose/close = 0.5
        assert_eq!(bars[0].close, 5.0);

        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2021, 6, 3).unwrap());
        assert_eq!(bars[1].close, 12.0); // no adjustment
        assert!(bars[0].date < bars[1].date);
    }

    #[test]
    fn not_found_payload_is_empty_not_error() {
        let json = json!({
            "chart": {
                "result": null,
                "error": { "code": "Not Found", "description": "No data found" }
            }
        });
        let bars = YahooScraper::parse_chart("GONE", &json).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn other_error_payload_is_a_fetch_error() {
        let json = json!({
            "chart": {
                "result": null,
                "error": { "code": "Internal Server Error", "description": "boom" }
            }
        });
        assert!(YahooScraper::parse_chart("ABC", &json).is_err());
    }

    #[test]
    fn missing_chart_key_is_a_fetch_error() {
        assert!(YahooScraper::parse_chart("ABC", &json!({})).is_err());
    }

    #[test]
    fn result_without_timestamps_is_empty() {
        let json = json!({
            "chart": { "result": [{ "meta": {} }], "error": null }
        });
        assert!(YahooScraper::parse_chart("ABC", &json).unwrap().is_empty());
    }

    #[test]
    fn parses_quote_profile() {
        let json = json!({
            "quoteResponse": {
                "result": [{
                    "longName": "Apple Inc.",
                    "shortName": "Apple",
                    "fullExchangeName": "NasdaqGS",
                    "market": "us_market",
                    "currency": "USD",
                    "quoteType": "EQUITY"
                }],
                "error": null
            }
        });
        let profile = YahooScraper::parse_quote("AAPL", &json).unwrap();
        assert_eq!(profile.long_name, "Apple Inc.");
        assert_eq!(profile.exchange, "NasdaqGS");

        let empty = json!({ "quoteResponse": { "result": [], "error": null } });
        assert!(YahooScraper::parse_quote("AAPL", &empty).is_err());
    }
}
