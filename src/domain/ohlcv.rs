//! OHLCV bar representation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl OhlcvBar {
    /// True when every price is finite and strictly positive and the high/low
    /// envelope contains open and close.
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.volume >= 0
    }
}

/// One value of a pre-computed indicator column supplied by a data source.
/// `None` is a gap (warmup or missing data).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnPoint {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_bar() -> OhlcvBar {
        OhlcvBar {
            symbol: "AAPL".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 50_000,
        }
    }

    #[test]
    fn well_formed_bar() {
        assert!(sample_bar().is_well_formed());
    }

    #[test]
    fn rejects_non_positive_price() {
        let mut bar = sample_bar();
        bar.low = 0.0;
        assert!(!bar.is_well_formed());
    }

    #[test]
    fn rejects_nan_close() {
        let mut bar = sample_bar();
        bar.close = f64::NAN;
        assert!(!bar.is_well_formed());
    }

    #[test]
    fn rejects_close_above_high() {
        let mut bar = sample_bar();
        bar.close = 111.0;
        assert!(!bar.is_well_formed());
    }
}
