//! CSV file market data adapter.
//!
//! One file per symbol at `<dir>/<SYMBOL>.csv`:
//!
//! ```text
//! date,open,high,low,close,volume[,<column>...]
//! 2024-01-02,187.15,188.44,183.89,185.64,82488700
//! ```
//!
//! Dates are `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`. Extra columns are
//! pre-computed indicator columns named as in the FeedIndex; an empty cell is
//! a gap. Rows are returned in file order so the feed can reject disorder.

use crate::domain::document::Interval;
use crate::domain::error::DataGapError;
use crate::domain::metrics::PricePoint;
use crate::domain::ohlcv::{ColumnPoint, OhlcvBar};
use crate::ports::data_port::{BenchmarkPort, MarketDataPort};
use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::path::PathBuf;

const PRICE_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    base_path: PathBuf,
}

/// Rows of one file inside the requested date range.
struct CsvTable {
    headers: Vec<String>,
    rows: Vec<(NaiveDateTime, StringRecord)>,
}

impl CsvTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    fn load(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<CsvTable, DataGapError> {
        let fetch_err = |reason: String| DataGapError::Fetch {
            symbol: symbol.to_string(),
            reason,
        };
        let path = self.csv_path(symbol);
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| fetch_err(format!("failed to read {}: {}", path.display(), e)))?;

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| fetch_err(format!("CSV header error: {}", e)))?
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        for required in PRICE_COLUMNS {
            if !headers.iter().any(|h| h == required) {
                return Err(fetch_err(format!("missing {} column", required)));
            }
        }
        let date_col = headers.iter().position(|h| h == "date").unwrap_or(0);

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| fetch_err(format!("CSV parse error: {}", e)))?;
            let raw = record.get(date_col).unwrap_or_default();
            let timestamp = parse_timestamp(raw)
                .ok_or_else(|| fetch_err(format!("invalid date `{}`", raw)))?;
            let date = timestamp.date();
            if date < start || date > end {
                continue;
            }
            rows.push((timestamp, record));
        }
        Ok(CsvTable { headers, rows })
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_field<T: std::str::FromStr>(
    symbol: &str,
    table: &CsvTable,
    record: &StringRecord,
    name: &str,
) -> Result<T, DataGapError> {
    let raw = table
        .column(name)
        .and_then(|i| record.get(i))
        .unwrap_or_default();
    raw.parse().map_err(|_| DataGapError::Fetch {
        symbol: symbol.to_string(),
        reason: format!("invalid {} value `{}`", name, raw),
    })
}

impl MarketDataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> Result<Vec<OhlcvBar>, DataGapError> {
        let table = self.load(symbol, start, end)?;
        table
            .rows
            .iter()
            .map(|(timestamp, record)| {
                let volume: f64 = parse_field(symbol, &table, record, "volume")?;
                Ok(OhlcvBar {
                    symbol: symbol.to_string(),
                    timestamp: *timestamp,
                    open: parse_field(symbol, &table, record, "open")?,
                    high: parse_field(symbol, &table, record, "high")?,
                    low: parse_field(symbol, &table, record, "low")?,
                    close: parse_field(symbol, &table, record, "close")?,
                    volume: volume.round() as i64,
                })
            })
            .collect()
    }

    fn fetch_column(
        &self,
        symbol: &str,
        column: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> Result<Option<Vec<ColumnPoint>>, DataGapError> {
        let table = self.load(symbol, start, end)?;
        let Some(index) = table.column(&column.to_ascii_lowercase()) else {
            return Ok(None);
        };
        let points = table
            .rows
            .iter()
            .map(|(timestamp, record)| {
                let raw = record.get(index).unwrap_or_default();
                let value = if raw.is_empty() {
                    None
                } else {
                    Some(raw.parse::<f64>().map_err(|_| DataGapError::Fetch {
                        symbol: symbol.to_string(),
                        reason: format!("invalid {} value `{}`", column, raw),
                    })?)
                };
                Ok(ColumnPoint {
                    timestamp: *timestamp,
                    value,
                })
            })
            .collect::<Result<Vec<_>, DataGapError>>()?;
        Ok(Some(points))
    }
}

impl BenchmarkPort for CsvAdapter {
    fn fetch_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, DataGapError> {
        let table = self.load(symbol, start, end)?;
        table
            .rows
            .iter()
            .map(|(timestamp, record)| {
                Ok(PricePoint {
                    timestamp: *timestamp,
                    price: parse_field(symbol, &table, record, "close")?,
                })
            })
            .collect()
    }
}
