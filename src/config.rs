use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy applied at the fetch boundary.
///
/// Attempt `n` (1-based) after a failure waits `backoff * 2^(n-1)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

pub struct Config {
    pub data_dir: String,
    /// Earliest date with published Reg SHO daily files.
    pub history_start: NaiveDate,
    pub debug_mode: bool,
    pub debug_symbol_limit: usize,
    pub force_full_history: bool,
    pub request_timeout: Duration,
    pub min_request_interval: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn new() -> Self {
        Self {
            data_dir: "data".to_string(),
            history_start: NaiveDate::from_ymd_opt(2011, 3, 1).unwrap(),
            debug_mode: false,
            debug_symbol_limit: 10,
            force_full_history: false,
            request_timeout: Duration::from_secs(30),
            min_request_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_data_dir(mut self, dir: &str) -> Self {
        self.data_dir = dir.to_string();
        self
    }

    pub fn with_history_start(mut self, start: NaiveDate) -> Self {
        self.history_start = start;
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn with_debug_symbol_limit(mut self, limit: usize) -> Self {
        self.debug_symbol_limit = limit;
        self
    }

    pub fn with_force_full_history(mut self, force_full: bool) -> Self {
        self.force_full_history = force_full;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Append-only archive of FINRA daily short sale files.
    pub fn short_sale_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("regsho").join("daily.csv")
    }

    /// Directory of per-symbol series files.
    pub fn series_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("stocks")
    }

    /// Symbol profile metadata file.
    pub fn profiles_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
            .join("symbols")
            .join("profiles.csv")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
