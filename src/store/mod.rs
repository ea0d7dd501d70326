use crate::errors::{Result, ShortvolError};
use crate::models::market::{
    DailyRecord, ShortSaleRecord, ShortTotals, SymbolProfile, SymbolSeries,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// How far from the end of the archive to look for its last line.
const TAIL_BYTES: u64 = 4096;

/// Per-symbol series storage: one `<SYMBOL>.csv` per symbol, comma
/// separated, ISO-8601 dates, header row first.
pub struct SeriesStore {
    dir: PathBuf,
}

impl SeriesStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }

    /// Load a stored series. `Ok(None)` when no file exists yet; a file that
    /// cannot be read as a series is a `ParseError` (the caller treats the
    /// symbol as having no history).
    pub fn load(&self, symbol: &str) -> Result<Option<SymbolSeries>> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| ShortvolError::ParseError(format!("{}: {}", path.display(), e)))?;

        let mut records = Vec::new();
        for result in reader.deserialize::<DailyRecord>() {
            let record = result
                .map_err(|e| ShortvolError::ParseError(format!("{}: {}", path.display(), e)))?;
            records.push(record);
        }

        Ok(Some(SymbolSeries::with_records(symbol, records)))
    }

    /// Persist the full series, overwriting any prior file for the symbol.
    pub fn save(&self, series: &SymbolSeries) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut writer = csv::Writer::from_path(self.path_for(&series.symbol))?;
        for record in &series.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Append-only archive of FINRA daily short sale files, pipe delimited with
/// the provider's column names. Doubles as the symbol source.
pub struct ShortSaleArchive {
    path: PathBuf,
}

impl ShortSaleArchive {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Newest archived date, read by tailing the file rather than scanning
    /// the whole archive.
    pub fn last_date(&self) -> Result<Option<NaiveDate>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(TAIL_BYTES)))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let tail = String::from_utf8_lossy(&buf);

        let last_line = tail
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty() && !line.starts_with("Date|"));
        let last_line = match last_line {
            Some(line) => line,
            None => return Ok(None),
        };

        let date_field = last_line.split('|').next().unwrap_or_default();
        let date = NaiveDate::parse_from_str(date_field, "%Y%m%d").map_err(|e| {
            ShortvolError::ParseError(format!(
                "bad trailing date {:?} in {}: {}",
                date_field,
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(date))
    }

    /// Append one day of records. The header is written once, when the file
    /// is first created.
    pub fn append_day(&self, records: &[ShortSaleRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let write_header = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'|')
            .has_headers(write_header)
            .from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load the archive aggregated per symbol and date, summing volumes
    /// across the reporting facilities.
    ///
    /// The unique keys are the symbol list for the run, so any failure here
    /// is a `RetrievalError`: fatal, nothing is fetched.
    pub fn load_by_symbol(&self) -> Result<BTreeMap<String, BTreeMap<NaiveDate, ShortTotals>>> {
        if !self.path.exists() {
            return Err(ShortvolError::RetrievalError(format!(
                "short sale archive not found at {}",
                self.path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .from_path(&self.path)
            .map_err(|e| {
                ShortvolError::RetrievalError(format!("{}: {}", self.path.display(), e))
            })?;

        let mut by_symbol: BTreeMap<String, BTreeMap<NaiveDate, ShortTotals>> = BTreeMap::new();
        for result in reader.deserialize::<ShortSaleRecord>() {
            let record = result.map_err(|e| {
                ShortvolError::RetrievalError(format!("{}: {}", self.path.display(), e))
            })?;
            by_symbol
                .entry(record.symbol.clone())
                .or_default()
                .entry(record.date)
                .or_default()
                .add(&record);
        }
        Ok(by_symbol)
    }
}

/// Append-only symbol profile metadata file.
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Symbols that already have a profile row.
    pub fn symbols(&self) -> Result<HashSet<String>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut symbols = HashSet::new();
        for result in reader.deserialize::<SymbolProfile>() {
            match result {
                Ok(profile) => {
                    symbols.insert(profile.symbol);
                }
                Err(_) => continue,
            }
        }
        Ok(symbols)
    }

    pub fn append(&self, profile: &SymbolProfile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let write_header = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(profile)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(date: &str) -> DailyRecord {
        DailyRecord {
            date: date.parse().unwrap(),
            open: 10.0,
            high: 11.5,
            low: 9.25,
            close: 11.0,
            short_volume: 1000,
            short_exempt_volume: 10,
            total_volume: 2500,
        }
    }

    fn short_row(date: &str, symbol: &str, market: &str, short: i64) -> ShortSaleRecord {
        ShortSaleRecord {
            date: NaiveDate::parse_from_str(date, "%Y%m%d").unwrap(),
            symbol: symbol.to_string(),
            short_volume: short,
            short_exempt_volume: 1,
            total_volume: short * 2,
            market: market.to_string(),
        }
    }

    #[test]
    fn series_roundtrip_and_layout() {
        let dir = TempDir::new().unwrap();
        let store = SeriesStore::new(dir.path().to_path_buf());

        let series = SymbolSeries::with_records(
            "ABC",
            vec![record("2011-03-01"), record("2011-03-02")],
        );
        store.save(&series).unwrap();

        let text = fs::read_to_string(store.path_for("ABC")).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("date,open,high,low,close,short_volume,short_exempt_volume,total_volume")
        );
        assert_eq!(
            lines.next(),
            Some("2011-03-01,10.0,11.5,9.25,11.0,1000,10,2500")
        );

        let loaded = store.load("ABC").unwrap().unwrap();
        assert_eq!(loaded, series);
    }

    #[test]
    fn load_missing_series_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SeriesStore::new(dir.path().to_path_buf());
        assert!(store.load("NOPE").unwrap().is_none());
    }

    #[test]
    fn malformed_series_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let store = SeriesStore::new(dir.path().to_path_buf());
        fs::write(store.path_for("BAD"), "not,a,series\ngarbage\n").unwrap();

        let err = store.load("BAD").unwrap_err();
        assert!(matches!(err, ShortvolError::ParseError(_)));
    }

    #[test]
    fn archive_appends_header_once_and_tails_last_date() {
        let dir = TempDir::new().unwrap();
        let archive = ShortSaleArchive::new(dir.path().join("regsho").join("daily.csv"));

        assert!(archive.last_date().unwrap().is_none());

        archive
            .append_day(&[
                short_row("20210601", "AAPL", "N", 100),
                short_row("20210601", "AAPL", "Q", 50),
            ])
            .unwrap();
        archive
            .append_day(&[short_row("20210602", "AAPL", "N", 70)])
            .unwrap();

        let text = fs::read_to_string(archive.path()).unwrap();
        assert_eq!(text.matches("Date|Symbol").count(), 1);
        assert_eq!(
            archive.last_date().unwrap(),
            Some(NaiveDate::from_ymd_opt(2021, 6, 2).unwrap())
        );
    }

    #[test]
    fn archive_aggregates_across_facilities() {
        let dir = TempDir::new().unwrap();
        let archive = ShortSaleArchive::new(dir.path().join("daily.csv"));

        archive
            .append_day(&[
                short_row("20210601", "AAPL", "N", 100),
                short_row("20210601", "AAPL", "Q", 50),
                short_row("20210601", "MSFT", "Q", 30),
            ])
            .unwrap();

        let by_symbol = archive.load_by_symbol().unwrap();
        assert_eq!(by_symbol.len(), 2);

        let date = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        let aapl = &by_symbol["AAPL"][&date];
        assert_eq!(aapl.short_volume, 150);
        assert_eq!(aapl.total_volume, 300);
    }

    #[test]
    fn missing_archive_is_a_retrieval_error() {
        let dir = TempDir::new().unwrap();
        let archive = ShortSaleArchive::new(dir.path().join("absent.csv"));
        let err = archive.load_by_symbol().unwrap_err();
        assert!(matches!(err, ShortvolError::RetrievalError(_)));
    }

    #[test]
    fn profile_store_tracks_existing_symbols() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path().join("symbols").join("profiles.csv"));

        assert!(store.symbols().unwrap().is_empty());

        store
            .append(&SymbolProfile {
                symbol: "AAPL".to_string(),
                long_name: "Apple Inc.".to_string(),
                short_name: "Apple".to_string(),
                exchange: "NasdaqGS".to_string(),
                market: "us_market".to_string(),
                currency: "USD".to_string(),
                quote_type: "EQUITY".to_string(),
            })
            .unwrap();

        let symbols = store.symbols().unwrap();
        assert!(symbols.contains("AAPL"));
        assert_eq!(symbols.len(), 1);
    }
}
