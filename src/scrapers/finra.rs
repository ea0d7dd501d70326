use crate::config::{Config, RetryPolicy};
use crate::errors::{Result, ShortvolError};
use crate::models::market::ShortSaleRecord;
use chrono::NaiveDate;
use log::debug;
use reqwest::{Client, StatusCode};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Reg SHO reporting facilities publishing daily short sale files.
const MARKETS: [&str; 3] = ["FNYX", "FNQC", "FNSQ"];

const EXPECTED_HEADER: &str = "Date|Symbol|ShortVolume|ShortExemptVolume|TotalVolume|Market";

/// FINRA Reg SHO daily short sale volume scraper
pub struct FinraScraper {
    client: Client,
    retry: RetryPolicy,
    min_request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl FinraScraper {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
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

    /// Download one facility file. `None` means the facility published
    /// nothing for the date (HTTP 404).
    async fn get_text(&self, url: &str) -> Result<Option<String>> {
        let mut last_error: Option<ShortvolError> = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return Ok(Some(response.text().await?));
                    }
                    last_error = Some(ShortvolError::FetchError(format!(
                        "HTTP {} for {}",
                        status, url
                    )));
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
            ShortvolError::FetchError(format!("max retries exceeded for {}", url))
        }))
    }

    /// Parse one facility file. A body that is not a Reg SHO file (error
    /// page, empty placeholder) yields no rows; trailer and malformed lines
    /// are skipped.
    fn parse_daily_file(text: &str) -> Vec<ShortSaleRecord> {
        let header_ok = text
            .lines()
            .next()
            .map(|line| line.trim() == EXPECTED_HEADER)
            .unwrap_or(false);
        if !header_ok {
            return Vec::new();
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for result in reader.deserialize::<ShortSaleRecord>() {
            match result {
                Ok(row) => rows.push(row),
                Err(_) => continue,
            }
        }
        rows
    }

    /// Fetch all facility files for one date. `None` means the market was
    /// closed that day: no facility published a file.
    pub async fn fetch_short_sale_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<Vec<ShortSaleRecord>>> {
        let tag = date.format("%Y%m%d").to_string();
        let mut records = Vec::new();

        for market in MARKETS {
            let url = format!("http://regsho.finra.org/{}shvol{}.txt", market, tag);
            self.wait_for_rate_limit().await;

            let text = match self.get_text(&url).await? {
                Some(text) => text,
                None => {
                    debug!("{} published no file for {}", market, date);
                    continue;
                }
            };

            let rows = Self::parse_daily_file(&text);
            if rows.is_empty() {
                debug!("{} file for {} contained no rows", market, date);
            }
            records.extend(rows);
        }

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }
}
