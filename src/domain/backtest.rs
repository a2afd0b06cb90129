//! Backtest engine and event loop.
//!
//! One pass over the unified timeline. On each timestamp, in universe order:
//!
//! 1. check the deadline;
//! 2. evaluate entries for Flat instruments with a bar here, respecting
//!    `max_positions`;
//! 3. evaluate exits for instruments that were Open when the bar started, so
//!    nothing enters and exits on the same bar;
//! 4. mark the portfolio to market and append to the equity curve.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use super::compiler::CompiledArtifact;
use super::deadline::Deadline;
use super::error::{RuntimeFault, SimulationError};
use super::execution::{EntryResult, Fill, enter_long, exit_position};
use super::feed::{InstrumentFeed, build_unified_timeline};
use super::portfolio::{EquityPoint, InstrumentSlot, Portfolio};
use super::program_eval::{entry_signal, first_exit};

/// Outcome of one completed simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationRun {
    pub universe: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_cash: f64,
    pub final_cash: f64,
    /// Final per-instrument state, in universe order.
    pub positions: Vec<InstrumentSlot>,
    pub equity_curve: Vec<EquityPoint>,
    pub fills: Vec<Fill>,
    pub bars_processed: usize,
}

impl SimulationRun {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.initial_cash)
    }
}

/// Run the artifact's program over `feeds`, which must cover the universe.
///
/// Any abort or fault discards the partial run.
pub fn run_backtest(
    artifact: &CompiledArtifact,
    feeds: &[InstrumentFeed],
    initial_cash: f64,
    deadline: &Deadline,
) -> Result<SimulationRun, SimulationError> {
    let params = artifact.params();
    let program = artifact.program();

    if !(initial_cash.is_finite() && initial_cash > 0.0) {
        return Err(RuntimeFault::new(format!("invalid initial cash {}", initial_cash)).into());
    }

    let slot_feeds: Vec<&InstrumentFeed> = params
        .universe
        .iter()
        .map(|symbol| {
            feeds
                .iter()
                .find(|feed| &feed.symbol == symbol)
                .ok_or_else(|| RuntimeFault::new(format!("no data feed for {}", symbol)))
        })
        .collect::<Result<_, _>>()?;

    let timeline = build_unified_timeline(feeds);
    let max_positions = params.position.max_positions.unwrap_or(usize::MAX);
    let mut portfolio = Portfolio::new(initial_cash, &params.universe);

    for (bars_processed, &timestamp) in timeline.iter().enumerate() {
        deadline.check(bars_processed)?;

        let open_at_start: Vec<bool> = portfolio.slots.iter().map(|s| s.state.is_open()).collect();
        let bar_indices: Vec<Option<usize>> = slot_feeds
            .iter()
            .map(|feed| feed.bar_index(timestamp))
            .collect();

        for (slot, bar) in bar_indices.iter().enumerate() {
            if let Some(i) = *bar {
                portfolio.slots[slot].last_close = Some(slot_feeds[slot].bars[i].close);
            }
        }

        for slot in 0..slot_feeds.len() {
            let Some(i) = bar_indices[slot] else {
                continue;
            };
            if !portfolio.slots[slot].state.is_flat() {
                continue;
            }
            let feed = slot_feeds[slot];
            if !entry_signal(program, |column| feed.value(column, i)) {
                continue;
            }
            if portfolio.open_count() >= max_positions {
                debug!(symbol = %feed.symbol, %timestamp, max_positions, "entry skipped: position limit reached");
                continue;
            }
            let close = feed.bars[i].close;
            match enter_long(&mut portfolio, slot, close, timestamp, &params.position, &params.costs)? {
                EntryResult::Entered(fill) => {
                    debug!(symbol = %fill.symbol, %timestamp, quantity = fill.quantity, price = fill.price, "entered");
                }
                EntryResult::InsufficientCapital => {
                    debug!(symbol = %feed.symbol, %timestamp, cash = portfolio.cash, "entry skipped: insufficient capital");
                }
            }
        }

        for slot in 0..slot_feeds.len() {
            if !open_at_start[slot] {
                continue;
            }
            let Some(i) = bar_indices[slot] else {
                continue;
            };
            let bar = &slot_feeds[slot].bars[i];
            let reason = portfolio.slots[slot]
                .state
                .position_mut()
                .and_then(|position| {
                    position.observe_high(bar.high);
                    first_exit(program, position, bar.close)
                });
            if let Some(reason) = reason {
                let fill = exit_position(&mut portfolio, slot, bar.close, timestamp, reason, &params.costs)?;
                debug!(symbol = %fill.symbol, %timestamp, %reason, pnl = fill.realized_pnl, "exited");
            }
        }

        let equity = portfolio.total_equity();
        if !(equity.is_finite() && portfolio.cash.is_finite()) {
            return Err(RuntimeFault {
                symbol: None,
                timestamp: Some(timestamp),
                detail: format!("equity is not finite (cash {}, equity {})", portfolio.cash, equity),
            }
            .into());
        }
        portfolio.record_equity(timestamp, equity);
    }

    Ok(SimulationRun {
        universe: params.universe.clone(),
        start: params.start,
        end: params.end,
        initial_cash,
        final_cash: portfolio.cash,
        positions: portfolio.slots,
        equity_curve: portfolio.equity_curve,
        fills: portfolio.fills,
        bars_processed: timeline.len(),
    })
}
