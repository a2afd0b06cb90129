//! Market data and benchmark port traits.
//!
//! The core never fetches data itself; the orchestrator pulls bars, optional
//! pre-computed indicator columns and benchmark closes through these seams.

use crate::domain::document::Interval;
use crate::domain::error::DataGapError;
use crate::domain::metrics::PricePoint;
use crate::domain::ohlcv::{ColumnPoint, OhlcvBar};
use chrono::NaiveDate;

pub trait MarketDataPort {
    /// Bars for `symbol` with `start <= date <= end`, oldest first. An empty
    /// vector means no coverage.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Vec<OhlcvBar>, DataGapError>;

    /// A pre-computed indicator column named as in the FeedIndex, one point
    /// per bar. `None` when the source does not supply it and it should be
    /// computed locally.
    fn fetch_column(
        &self,
        _symbol: &str,
        _column: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _interval: Interval,
    ) -> Result<Option<Vec<ColumnPoint>>, DataGapError> {
        Ok(None)
    }
}

pub trait BenchmarkPort {
    /// Closing prices for a benchmark symbol over the same range.
    fn fetch_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, DataGapError>;
}
