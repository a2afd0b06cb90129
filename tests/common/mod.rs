#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use std::cell::Cell;
use std::collections::BTreeMap;
use stratrun::domain::document::{Interval, StrategyDocument};
use stratrun::domain::error::DataGapError;
use stratrun::domain::metrics::PricePoint;
pub use stratrun::domain::ohlcv::{ColumnPoint, OhlcvBar};
use stratrun::ports::data_port::{BenchmarkPort, MarketDataPort};

/// In-memory market data that counts every request it serves.
pub struct MockMarketData {
    pub bars: BTreeMap<String, Vec<OhlcvBar>>,
    pub columns: BTreeMap<(String, String), Vec<ColumnPoint>>,
    pub benchmarks: BTreeMap<String, Vec<PricePoint>>,
    pub errors: BTreeMap<String, String>,
    /// Drop bars outside the requested range, as a well-behaved source does.
    pub clip_to_range: bool,
    fetches: Cell<usize>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            bars: BTreeMap::new(),
            columns: BTreeMap::new(),
            benchmarks: BTreeMap::new(),
            errors: BTreeMap::new(),
            clip_to_range: true,
            fetches: Cell::new(0),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    /// Supply a pre-computed column, one value per bar of `symbol`.
    pub fn with_column(mut self, symbol: &str, column: &str, values: &[Option<f64>]) -> Self {
        let points = self.bars[symbol]
            .iter()
            .zip(values)
            .map(|(bar, value)| ColumnPoint {
                timestamp: bar.timestamp,
                value: *value,
            })
            .collect();
        self.columns
            .insert((symbol.to_string(), column.to_string()), points);
        self
    }

    pub fn with_benchmark(mut self, symbol: &str, points: Vec<PricePoint>) -> Self {
        self.benchmarks.insert(symbol.to_string(), points);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    fn count(&self) {
        self.fetches.set(self.fetches.get() + 1);
    }
}

impl MarketDataPort for MockMarketData {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> Result<Vec<OhlcvBar>, DataGapError> {
        self.count();
        if let Some(reason) = self.errors.get(symbol) {
            return Err(DataGapError::Fetch {
                symbol: symbol.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| {
                        !self.clip_to_range
                            || (b.timestamp.date() >= start && b.timestamp.date() <= end)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_column(
        &self,
        symbol: &str,
        column: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _interval: Interval,
    ) -> Result<Option<Vec<ColumnPoint>>, DataGapError> {
        self.count();
        Ok(self
            .columns
            .get(&(symbol.to_string(), column.to_string()))
            .cloned())
    }
}

impl BenchmarkPort for MockMarketData {
    fn fetch_closes(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<PricePoint>, DataGapError> {
        self.count();
        match self.benchmarks.get(symbol) {
            Some(points) => Ok(points.clone()),
            None => Err(DataGapError::Fetch {
                symbol: symbol.to_string(),
                reason: "unknown benchmark".to_string(),
            }),
        }
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn midnight(d: NaiveDate) -> NaiveDateTime {
    d.and_hms_opt(0, 0, 0).unwrap()
}

/// Monday-to-Friday timestamps in `[start, end]`.
pub fn weekdays(start: &str, end: &str) -> Vec<NaiveDateTime> {
    let end = date(end);
    date(start)
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .map(midnight)
        .collect()
}

pub fn make_bar(symbol: &str, timestamp: NaiveDateTime, close: f64, high: f64) -> OhlcvBar {
    OhlcvBar {
        symbol: symbol.to_string(),
        timestamp,
        open: close,
        high: high.max(close),
        low: close * 0.99,
        close,
        volume: 10_000,
    }
}

/// One bar per consecutive calendar day from `start`, high = close.
pub fn daily_bars(symbol: &str, start: &str, closes: &[f64]) -> Vec<OhlcvBar> {
    date(start)
        .iter_days()
        .zip(closes)
        .map(|(d, &close)| make_bar(symbol, midnight(d), close, close))
        .collect()
}

pub fn document(json: &str) -> StrategyDocument {
    StrategyDocument::from_json(json).unwrap()
}

/// A document over `universe` for 2024 with the given JSON
/// fragments for entry, exit and position.
pub fn strategy(universe: &[&str], entry: &str, exit: &str, position: &str) -> StrategyDocument {
    let universe: Vec<String> = universe.iter().map(|s| format!("\"{s}\"")).collect();
    document(&format!(
        r#"{{
            "name": "integration",
            "universe": [{}],
            "timeframe": {{"start": "2024-01-01", "end": "2024-12-31", "interval": "1d"}},
            "entry": [{}],
            "exit": [{}],
            "position": {},
            "costs": {{"commission_per_share": 0.0, "slippage_bps": 0.0}}
        }}"#,
        universe.join(","),
        entry,
        exit,
        position
    ))
}
