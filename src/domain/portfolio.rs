//! Portfolio state: cash, per-instrument position slots, fills and the equity
//! curve.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::execution::Fill;
use super::position::PositionState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// One instrument of the universe. Slots keep universe order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentSlot {
    pub symbol: String,
    pub state: PositionState,
    pub last_close: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_cash: f64,
    pub slots: Vec<InstrumentSlot>,
    pub fills: Vec<Fill>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_cash: f64, universe: &[String]) -> Self {
        Portfolio {
            cash: initial_cash,
            initial_cash,
            slots: universe
                .iter()
                .map(|symbol| InstrumentSlot {
                    symbol: symbol.clone(),
                    state: PositionState::Flat,
                    last_close: None,
                })
                .collect(),
            fills: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    /// Instruments currently holding a position (open or mid-exit).
    pub fn open_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.position().is_some() || matches!(s.state, PositionState::Entering))
            .count()
    }

    pub fn record_fill(&mut self, fill: Fill) {
        self.fills.push(fill);
    }

    pub fn record_equity(&mut self, timestamp: NaiveDateTime, equity: f64) {
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }

    /// Cash plus open positions marked at each instrument's most recent close.
    pub fn total_equity(&self) -> f64 {
        let position_value: f64 = self
            .slots
            .iter()
            .filter_map(|slot| {
                let pos = slot.state.position()?;
                Some(pos.market_value(slot.last_close.unwrap_or(pos.entry_price)))
            })
            .sum();
        self.cash + position_value
    }
}
