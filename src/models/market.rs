use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One day of OHLC prices as returned by the price provider.
///
/// Prices are split/dividend adjusted. Volume figures are not part of the
/// bar; they come from the short sale archive.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
}

/// One row of a FINRA Reg SHO daily short sale file.
///
/// Field names and the YYYYMMDD date form match the published files, so the
/// archive on disk keeps the provider's native layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShortSaleRecord {
    #[serde(with = "yyyymmdd")]
    pub date: NaiveDate,
    pub symbol: String,
    pub short_volume: i64,
    pub short_exempt_volume: i64,
    pub total_volume: i64,
    pub market: String,
}

/// Per-date short sale volumes summed across the reporting facilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShortTotals {
    pub short_volume: i64,
    pub short_exempt_volume: i64,
    pub total_volume: i64,
}

impl ShortTotals {
    pub fn add(&mut self, record: &ShortSaleRecord) {
        self.short_volume += record.short_volume;
        self.short_exempt_volume += record.short_exempt_volume;
        self.total_volume += record.total_volume;
    }
}

/// One merged trading day for a symbol: adjusted OHLC plus short sale volume.
/// Uniquely keyed by (symbol, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
    pub short_volume: i64,
    pub short_exempt_volume: i64,
    pub total_volume: i64,
}

impl DailyRecord {
    pub fn from_bar(bar: &PriceBar, shorts: ShortTotals) -> Self {
        Self {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            short_volume: shorts.short_volume,
            short_exempt_volume: shorts.short_exempt_volume,
            total_volume: shorts.total_volume,
        }
    }
}

/// The full daily history for one symbol.
///
/// Invariants: record dates are unique and sorted ascending. `merge`
/// re-establishes both after any insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSeries {
    pub symbol: String,
    pub records: Vec<DailyRecord>,
}

impl SymbolSeries {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            records: Vec::new(),
        }
    }

    pub fn with_records(symbol: &str, records: Vec<DailyRecord>) -> Self {
        Self {
            symbol: symbol.to_string(),
            records,
        }
    }

    /// Latest recorded date, relying on the ascending-order invariant.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// Merge newly fetched records into the series.
    ///
    /// Keyed by date; an incoming record for an already stored date replaces
    /// the stored one. The result is sorted ascending with unique dates.
    pub fn merge(&mut self, incoming: Vec<DailyRecord>) {
        if incoming.is_empty() {
            return;
        }

        let mut by_date: BTreeMap<NaiveDate, DailyRecord> = BTreeMap::new();
        for record in self.records.drain(..) {
            by_date.insert(record.date, record);
        }
        for record in incoming {
            by_date.insert(record.date, record);
        }

        self.records = by_date.into_values().collect();
    }
}

/// Quote metadata for one symbol, appended to the profiles file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolProfile {
    pub symbol: String,
    pub long_name: String,
    pub short_name: String,
    pub exchange: String,
    pub market: String,
    pub currency: String,
    pub quote_type: String,
}

/// Serde codec for FINRA's compact YYYYMMDD date form.
pub mod yyyymmdd {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&date.format("%Y%m%d"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&s, "%Y%m%d").map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, close: f32) -> DailyRecord {
        DailyRecord {
            date: date.parse().unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            short_volume: 100,
            short_exempt_volume: 5,
            total_volume: 300,
        }
    }

    #[test]
    fn merge_appends_new_dates_in_order() {
        let mut series = SymbolSeries::with_records(
            "ABC",
            vec![record("2021-05-28", 10.0), record("2021-06-01", 11.0)],
        );
        series.merge(vec![record("2021-06-03", 13.0), record("2021-06-02", 12.0)]);

        let dates: Vec<String> = series.records.iter().map(|r| r.date.to_string()).collect();
        assert_eq!(
            dates,
            vec!["2021-05-28", "2021-06-01", "2021-06-02", "2021-06-03"]
        );
    }

    #[test]
    fn merge_overwrites_overlapping_dates_and_keeps_the_rest() {
        let mut series = SymbolSeries::with_records(
            "ABC",
            vec![record("2021-06-01", 11.0), record("2021-06-02", 12.0)],
        );
        series.merge(vec![record("2021-06-02", 99.0)]);

        assert_eq!(series.records.len(), 2);
        assert_eq!(series.records[0].close, 11.0);
        assert_eq!(series.records[1].close, 99.0);
    }

    #[test]
    fn merge_is_idempotent() {
        let incoming = vec![record("2021-06-01", 11.0), record("2021-06-02", 12.0)];
        let mut series = SymbolSeries::new("ABC");
        series.merge(incoming.clone());
        let first = series.clone();
        series.merge(incoming);
        assert_eq!(series, first);
    }

    #[test]
    fn merge_keeps_dates_strictly_increasing() {
        let mut series = SymbolSeries::new("ABC");
        series.merge(vec![
            record("2011-03-02", 2.0),
            record("2011-03-01", 1.0),
            record("2011-03-02", 3.0),
        ]);

        assert_eq!(series.records.len(), 2);
        assert!(series
            .records
            .windows(2)
            .all(|pair| pair[0].date < pair[1].date));
        assert_eq!(series.last_date(), Some("2011-03-02".parse().unwrap()));
    }

    #[test]
    fn short_totals_accumulate_across_markets() {
        let row = |market: &str, short: i64| ShortSaleRecord {
            date: "2021-06-01".parse().unwrap(),
            symbol: "ABC".to_string(),
            short_volume: short,
            short_exempt_volume: 1,
            total_volume: short * 2,
            market: market.to_string(),
        };

        let mut totals = ShortTotals::default();
        totals.add(&row("N", 100));
        totals.add(&row("Q", 50));

        assert_eq!(totals.short_volume, 150);
        assert_eq!(totals.short_exempt_volume, 2);
        assert_eq!(totals.total_volume, 300);
    }
}
