//! Per-instrument data feed and the unified timeline.
//!
//! A feed holds an instrument's bars plus one value vector per FeedIndex
//! column, aligned with the bars. Columns come from the data source when it
//! supplies them and are otherwise computed here, once per indicator.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::error::DataGapError;
use super::indicator::{IndicatorOutput, IndicatorType};
use super::ohlcv::{ColumnPoint, OhlcvBar};
use super::program::{FeedColumn, FeedIndex};

#[derive(Debug, Clone)]
pub struct InstrumentFeed {
    pub symbol: String,
    pub bars: Vec<OhlcvBar>,
    /// `columns[c][i]` is FeedIndex column `c` on bar `i`.
    pub columns: Vec<Vec<Option<f64>>>,
    timestamp_index: HashMap<NaiveDateTime, usize>,
}

impl InstrumentFeed {
    /// Validate bars and supplied columns against `feed_index` and fill in
    /// every column the source did not supply.
    pub fn assemble(
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        bars: Vec<OhlcvBar>,
        supplied: &BTreeMap<String, Vec<ColumnPoint>>,
        feed_index: &FeedIndex,
    ) -> Result<Self, DataGapError> {
        if bars.is_empty() {
            return Err(DataGapError::NoBars {
                symbol: symbol.to_string(),
                start,
                end,
            });
        }
        check_bars(symbol, start, end, &bars)?;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let mut computed: BTreeMap<IndicatorType, IndicatorOutput> = BTreeMap::new();
        let mut columns = Vec::with_capacity(feed_index.len());

        for column in &feed_index.columns {
            let values = match supplied.get(&column.name) {
                Some(points) => check_supplied(symbol, &bars, column, points)?,
                None => {
                    let required = column.indicator.required_bars(column.field);
                    if bars.len() < required {
                        return Err(DataGapError::InsufficientHistory {
                            symbol: symbol.to_string(),
                            column: column.name.clone(),
                            bars: bars.len(),
                            required,
                        });
                    }
                    let output = computed
                        .entry(column.indicator)
                        .or_insert_with(|| column.indicator.compute(&closes));
                    output
                        .field(column.field)
                        .map(<[Option<f64>]>::to_vec)
                        .unwrap_or_else(|| vec![None; bars.len()])
                }
            };
            columns.push(values);
        }

        let timestamp_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.timestamp, i))
            .collect();

        Ok(Self {
            symbol: symbol.to_string(),
            bars,
            columns,
            timestamp_index,
        })
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn bar_index(&self, timestamp: NaiveDateTime) -> Option<usize> {
        self.timestamp_index.get(&timestamp).copied()
    }

    /// Value of FeedIndex column `column` on bar `bar`.
    pub fn value(&self, column: usize, bar: usize) -> Option<f64> {
        self.columns.get(column)?.get(bar).copied().flatten()
    }
}

fn check_bars(
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    bars: &[OhlcvBar],
) -> Result<(), DataGapError> {
    for (i, bar) in bars.iter().enumerate() {
        let date = bar.timestamp.date();
        if date < start || date > end {
            return Err(DataGapError::OutOfRange {
                symbol: symbol.to_string(),
                timestamp: bar.timestamp,
                start,
                end,
            });
        }
        if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
            return Err(DataGapError::UnorderedBars {
                symbol: symbol.to_string(),
                timestamp: bar.timestamp,
            });
        }
        if !bar.is_well_formed() {
            return Err(DataGapError::InvalidPrice {
                symbol: symbol.to_string(),
                timestamp: bar.timestamp,
            });
        }
    }
    Ok(())
}

/// A supplied column must line up with the bars one-to-one. Leading gaps are
/// warmup; once a value has appeared every later bar must have one.
fn check_supplied(
    symbol: &str,
    bars: &[OhlcvBar],
    column: &FeedColumn,
    points: &[ColumnPoint],
) -> Result<Vec<Option<f64>>, DataGapError> {
    if points.len() != bars.len() {
        return Err(DataGapError::ColumnLength {
            symbol: symbol.to_string(),
            column: column.name.clone(),
            expected: bars.len(),
            found: points.len(),
        });
    }

    let mut values = Vec::with_capacity(points.len());
    let mut started = false;
    for (bar, point) in bars.iter().zip(points) {
        if point.timestamp != bar.timestamp {
            return Err(DataGapError::ColumnMisaligned {
                symbol: symbol.to_string(),
                column: column.name.clone(),
                timestamp: bar.timestamp,
            });
        }
        let value = point.value.filter(|v| v.is_finite());
        match value {
            Some(_) => started = true,
            None if started => {
                return Err(DataGapError::ColumnGap {
                    symbol: symbol.to_string(),
                    column: column.name.clone(),
                    timestamp: bar.timestamp,
                });
            }
            None => {}
        }
        values.push(value);
    }

    if !started {
        return Err(DataGapError::InsufficientHistory {
            symbol: symbol.to_string(),
            column: column.name.clone(),
            bars: bars.len(),
            required: column.indicator.required_bars(column.field),
        });
    }
    Ok(values)
}

/// Every timestamp on which at least one instrument has a bar, ascending.
pub fn build_unified_timeline(feeds: &[InstrumentFeed]) -> Vec<NaiveDateTime> {
    let unique: BTreeSet<NaiveDateTime> = feeds
        .iter()
        .flat_map(|feed| feed.bars.iter().map(|bar| bar.timestamp))
        .collect();
    unique.into_iter().collect()
}

/// Every instrument must have a bar on every timestamp of `timeline`. The
/// first hole found, in feed order, is reported.
pub fn check_coverage(
    feeds: &[InstrumentFeed],
    timeline: &[NaiveDateTime],
) -> Result<(), DataGapError> {
    for feed in feeds {
        if feed.bar_count() == timeline.len() {
            continue;
        }
        if let Some(&timestamp) = timeline.iter().find(|ts| feed.bar_index(**ts).is_none()) {
            return Err(DataGapError::MissingBar {
                symbol: feed.symbol.clone(),
                timestamp,
            });
        }
    }
    Ok(())
}
