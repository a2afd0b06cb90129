//! Performance metrics and benchmark comparison.
//!
//! Everything here is a pure function of the equity curve, the trade log and
//! the benchmark price series, so identical inputs give identical results.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::execution::{Fill, Side};
use super::portfolio::EquityPoint;

const DAYS_PER_YEAR: f64 = 365.25;

/// Standard deviations at or below this are treated as zero.
const MIN_STDDEV: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsConfig {
    pub initial_equity: f64,
    pub periods_per_year: f64,
    /// Annual rate, compounded down to one period.
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: NaiveDateTime,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCurve {
    pub symbol: String,
    pub points: Vec<PricePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub symbol: String,
    pub aligned_points: usize,
    pub total_return: Option<f64>,
    pub cagr: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub excess_return: Option<f64>,
    pub excess_cagr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum CoverageIssue {
    /// Strategy timestamps the benchmark has no price for.
    MissingTimestamps {
        count: usize,
        first_missing: NaiveDateTime,
    },
    /// Fewer than two timestamps shared with the strategy curve.
    InsufficientOverlap { aligned_points: usize },
    /// The benchmark series could not be loaded at all.
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageWarning {
    pub symbol: String,
    #[serde(flatten)]
    pub issue: CoverageIssue,
}

impl fmt::Display for CoverageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.issue {
            CoverageIssue::MissingTimestamps {
                count,
                first_missing,
            } => write!(
                f,
                "{}: {} strategy timestamp(s) missing, first at {}",
                self.symbol, count, first_missing
            ),
            CoverageIssue::InsufficientOverlap { aligned_points } => write!(
                f,
                "{}: only {} aligned point(s), excess return undefined",
                self.symbol, aligned_points
            ),
            CoverageIssue::Unavailable { reason } => {
                write!(f, "{}: benchmark unavailable: {}", self.symbol, reason)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub closed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakeven: usize,
    pub win_rate: f64,
    /// Gross wins over gross losses; `None` without any losing trade.
    pub profit_factor: Option<f64>,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub total_return: f64,
    pub cagr: f64,
    /// Non-positive fraction of the running peak.
    pub max_drawdown: f64,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub excess_returns: BTreeMap<String, Option<f64>>,
    pub benchmarks: Vec<BenchmarkSummary>,
    pub warnings: Vec<CoverageWarning>,
    pub trades: TradeStats,
}

pub fn measure(
    curve: &[EquityPoint],
    fills: &[Fill],
    benchmarks: &[BenchmarkCurve],
    config: &MetricsConfig,
) -> MetricsResult {
    let initial = config.initial_equity;
    let final_equity = curve.last().map(|p| p.equity).unwrap_or(initial);

    let total_return = growth(initial, final_equity);
    let cagr = compute_cagr(initial, final_equity, span_years(curve));
    let max_drawdown = compute_drawdown(curve.iter().map(|p| p.equity));

    let returns = period_returns(initial, curve);
    let rf_per_period = per_period_rate(config.risk_free_rate, config.periods_per_year);
    let sharpe = compute_sharpe(&returns, rf_per_period, config.periods_per_year);
    let sortino = compute_sortino(&returns, rf_per_period, config.periods_per_year);
    let calmar = if max_drawdown < 0.0 {
        Some(cagr / max_drawdown.abs())
    } else {
        None
    };

    let mut excess_returns = BTreeMap::new();
    let mut summaries = Vec::with_capacity(benchmarks.len());
    let mut warnings = Vec::new();
    for benchmark in benchmarks {
        let summary = compare_benchmark(curve, benchmark, initial, total_return, cagr, &mut warnings);
        excess_returns.insert(benchmark.symbol.clone(), summary.excess_return);
        summaries.push(summary);
    }

    MetricsResult {
        total_return,
        cagr,
        max_drawdown,
        sharpe,
        sortino,
        calmar,
        excess_returns,
        benchmarks: summaries,
        warnings,
        trades: trade_stats(fills),
    }
}

fn growth(start: f64, end: f64) -> f64 {
    if start > 0.0 { end / start - 1.0 } else { 0.0 }
}

fn span_years(curve: &[EquityPoint]) -> f64 {
    match (curve.first(), curve.last()) {
        (Some(first), Some(last)) => years_between(first.timestamp, last.timestamp),
        _ => 0.0,
    }
}

fn years_between(start: NaiveDateTime, end: NaiveDateTime) -> f64 {
    (end - start).num_days() as f64 / DAYS_PER_YEAR
}

fn compute_cagr(start: f64, end: f64, years: f64) -> f64 {
    if years <= 0.0 || start <= 0.0 {
        return 0.0;
    }
    let ratio = end / start;
    if ratio <= 0.0 {
        return -1.0;
    }
    ratio.powf(1.0 / years) - 1.0
}

fn compute_drawdown(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for value in values {
        if value > peak {
            peak = value;
        } else if peak > 0.0 {
            max_dd = max_dd.min((value - peak) / peak);
        }
    }
    max_dd
}

/// Bar-to-bar returns, starting with the step from `initial` to the first
/// marked bar.
fn period_returns(initial: f64, curve: &[EquityPoint]) -> Vec<f64> {
    let mut previous = initial;
    curve
        .iter()
        .map(|point| {
            let r = growth(previous, point.equity);
            previous = point.equity;
            r
        })
        .collect()
}

/// Annual rate compounded down to one period.
fn per_period_rate(annual: f64, periods: f64) -> f64 {
    if periods > 0.0 {
        (1.0 + annual).powf(1.0 / periods) - 1.0
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; `None` below two observations.
fn sample_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

fn compute_sharpe(returns: &[f64], rf_per_period: f64, periods: f64) -> Option<f64> {
    let stddev = sample_stddev(returns).filter(|s| *s > MIN_STDDEV)?;
    Some((mean(returns) - rf_per_period) / stddev * periods.sqrt())
}

fn compute_sortino(returns: &[f64], rf_per_period: f64, periods: f64) -> Option<f64> {
    let downside: Vec<f64> = returns
        .iter()
        .copied()
        .filter(|r| *r < rf_per_period)
        .collect();
    let stddev = sample_stddev(&downside).filter(|s| *s > MIN_STDDEV)?;
    Some((mean(returns) - rf_per_period) / stddev * periods.sqrt())
}

/// Compare against one benchmark over the timestamps both curves share.
///
/// The strategy leg of the comparison is measured from its initial equity
/// when the overlap starts at the first bar, and from the equity at the
/// first shared timestamp otherwise.
fn compare_benchmark(
    curve: &[EquityPoint],
    benchmark: &BenchmarkCurve,
    initial_equity: f64,
    total_return: f64,
    cagr: f64,
    warnings: &mut Vec<CoverageWarning>,
) -> BenchmarkSummary {
    let prices: BTreeMap<NaiveDateTime, f64> = benchmark
        .points
        .iter()
        .filter(|p| p.price.is_finite() && p.price > 0.0)
        .map(|p| (p.timestamp, p.price))
        .collect();

    let mut aligned: Vec<(usize, f64)> = Vec::new();
    let mut missing = 0usize;
    let mut first_missing = None;
    for (i, point) in curve.iter().enumerate() {
        match prices.get(&point.timestamp) {
            Some(&price) => aligned.push((i, price)),
            None => {
                missing += 1;
                first_missing.get_or_insert(point.timestamp);
            }
        }
    }

    if let Some(first_missing) = first_missing {
        warnings.push(CoverageWarning {
            symbol: benchmark.symbol.clone(),
            issue: CoverageIssue::MissingTimestamps {
                count: missing,
                first_missing,
            },
        });
    }

    let (Some(&(first_idx, first_price)), Some(&(last_idx, last_price))) =
        (aligned.first(), aligned.last())
    else {
        return insufficient(benchmark, 0, warnings);
    };
    if aligned.len() < 2 {
        return insufficient(benchmark, aligned.len(), warnings);
    }

    let years = years_between(curve[first_idx].timestamp, curve[last_idx].timestamp);
    let bench_return = growth(first_price, last_price);
    let bench_cagr = compute_cagr(first_price, last_price, years);
    let bench_drawdown = compute_drawdown(aligned.iter().map(|(_, price)| *price));

    let full_overlap = first_idx == 0 && last_idx + 1 == curve.len();
    let (strategy_return, strategy_cagr) = if full_overlap {
        (total_return, cagr)
    } else {
        let base = if first_idx == 0 {
            initial_equity
        } else {
            curve[first_idx].equity
        };
        let end = curve[last_idx].equity;
        (growth(base, end), compute_cagr(base, end, years))
    };

    BenchmarkSummary {
        symbol: benchmark.symbol.clone(),
        aligned_points: aligned.len(),
        total_return: Some(bench_return),
        cagr: Some(bench_cagr),
        max_drawdown: Some(bench_drawdown),
        excess_return: Some(strategy_return - bench_return),
        excess_cagr: Some(strategy_cagr - bench_cagr),
    }
}

fn insufficient(
    benchmark: &BenchmarkCurve,
    aligned_points: usize,
    warnings: &mut Vec<CoverageWarning>,
) -> BenchmarkSummary {
    warnings.push(CoverageWarning {
        symbol: benchmark.symbol.clone(),
        issue: CoverageIssue::InsufficientOverlap { aligned_points },
    });
    BenchmarkSummary {
        symbol: benchmark.symbol.clone(),
        aligned_points,
        total_return: None,
        cagr: None,
        max_drawdown: None,
        excess_return: None,
        excess_cagr: None,
    }
}

/// Statistics over closing fills. Holding time pairs each sell with the
/// preceding buy of the same symbol.
pub fn trade_stats(fills: &[Fill]) -> TradeStats {
    let mut entries: BTreeMap<&str, NaiveDateTime> = BTreeMap::new();
    let mut stats = TradeStats::default();
    let mut total_wins = 0.0_f64;
    let mut total_losses = 0.0_f64;
    let mut holding_days = 0i64;

    for fill in fills {
        match fill.side {
            Side::Buy => {
                entries.insert(&fill.symbol, fill.timestamp);
            }
            Side::Sell => {
                let Some(pnl) = fill.realized_pnl else {
                    continue;
                };
                stats.closed_trades += 1;
                if let Some(entered) = entries.remove(fill.symbol.as_str()) {
                    holding_days += (fill.timestamp - entered).num_days();
                }
                if pnl > 0.0 {
                    stats.wins += 1;
                    total_wins += pnl;
                    stats.largest_win = stats.largest_win.max(pnl);
                } else if pnl < 0.0 {
                    stats.losses += 1;
                    total_losses += pnl.abs();
                    stats.largest_loss = stats.largest_loss.max(pnl.abs());
                } else {
                    stats.breakeven += 1;
                }
            }
        }
    }

    if stats.closed_trades > 0 {
        stats.win_rate = stats.wins as f64 / stats.closed_trades as f64;
        stats.avg_holding_days = holding_days as f64 / stats.closed_trades as f64;
    }
    if stats.wins > 0 {
        stats.avg_win = total_wins / stats.wins as f64;
    }
    if stats.losses > 0 {
        stats.avg_loss = total_losses / stats.losses as f64;
        stats.profit_factor = Some(total_wins / total_losses);
    }
    stats
}

/// Symbols of `benchmarks` in first-seen order with duplicates removed.
pub fn dedup_symbols(benchmarks: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    benchmarks
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}
