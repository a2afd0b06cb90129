//! Open positions and the per-instrument position state machine.
//!
//! Each instrument moves `Flat → Entering → Open → Exiting → Flat`. Any other
//! transition is a runtime fault.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::error::RuntimeFault;
use super::program::ExitKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub entry_timestamp: NaiveDateTime,
    pub entry_commission: f64,
    /// Reference level for the trailing stop: the entry bar's close, raised
    /// by the high of each later bar.
    pub peak: f64,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity as f64 * price
    }

    pub fn observe_high(&mut self, high: f64) {
        if high > self.peak {
            self.peak = high;
        }
    }

    pub fn stop_loss_hit(&self, close: f64, percent: f64) -> bool {
        close <= self.entry_price * (1.0 - percent)
    }

    pub fn take_profit_hit(&self, close: f64, percent: f64) -> bool {
        close >= self.entry_price * (1.0 + percent)
    }

    pub fn trailing_stop_hit(&self, close: f64, percent: f64) -> bool {
        close <= self.peak * (1.0 - percent)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PositionState {
    #[default]
    Flat,
    Entering,
    Open(Position),
    Exiting {
        position: Position,
        reason: ExitKind,
    },
}

impl PositionState {
    pub fn label(&self) -> &'static str {
        match self {
            PositionState::Flat => "flat",
            PositionState::Entering => "entering",
            PositionState::Open(_) => "open",
            PositionState::Exiting { .. } => "exiting",
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PositionState::Open(_))
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            PositionState::Open(p) | PositionState::Exiting { position: p, .. } => Some(p),
            _ => None,
        }
    }

    pub fn position_mut(&mut self) -> Option<&mut Position> {
        match self {
            PositionState::Open(p) => Some(p),
            _ => None,
        }
    }

    fn illegal(&self, to: &str) -> RuntimeFault {
        RuntimeFault::new(format!("illegal transition {} -> {}", self.label(), to))
    }

    /// Flat → Entering
    pub fn begin_entry(&mut self) -> Result<(), RuntimeFault> {
        match self {
            PositionState::Flat => {
                *self = PositionState::Entering;
                Ok(())
            }
            _ => Err(self.illegal("entering")),
        }
    }

    /// Entering → Open
    pub fn complete_entry(&mut self, position: Position) -> Result<(), RuntimeFault> {
        match self {
            PositionState::Entering => {
                *self = PositionState::Open(position);
                Ok(())
            }
            _ => Err(self.illegal("open")),
        }
    }

    /// Open → Exiting
    pub fn begin_exit(&mut self, reason: ExitKind) -> Result<(), RuntimeFault> {
        match std::mem::take(self) {
            PositionState::Open(position) => {
                *self = PositionState::Exiting { position, reason };
                Ok(())
            }
            other => {
                let fault = other.illegal("exiting");
                *self = other;
                Err(fault)
            }
        }
    }

    /// Exiting → Flat, handing back the closed position and its exit reason.
    pub fn complete_exit(&mut self) -> Result<(Position, ExitKind), RuntimeFault> {
        match std::mem::take(self) {
            PositionState::Exiting { position, reason } => Ok((position, reason)),
            other => {
                let fault = other.illegal("flat");
                *self = other;
                Err(fault)
            }
        }
    }
}
