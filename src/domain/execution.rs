//! Fill simulation: slippage, per-share commission, whole-share sizing and
//! long entries/exits against a portfolio slot.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::document::{PositionSpec, SizingMode};
use super::error::RuntimeFault;
use super::portfolio::Portfolio;
use super::position::Position;
use super::program::ExitKind;

/// Relative slack applied before flooring a share count.
const SHARE_ROUNDING: f64 = 1e-12;

/// Trading costs carried through from the strategy document.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutionConfig {
    pub commission_per_share: f64,
    pub slippage_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// One trade log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    pub commission: f64,
    pub timestamp: NaiveDateTime,
    /// Net of entry and exit commissions; set on closing fills only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ExitKind>,
}

pub fn calculate_commission(quantity: i64, config: &ExecutionConfig) -> f64 {
    quantity as f64 * config.commission_per_share
}

/// Buy at close × (1 + bps/10 000).
pub fn apply_slippage_buy(close: f64, slippage_bps: f64) -> f64 {
    close * (1.0 + slippage_bps / 10_000.0)
}

/// Sell at close × (1 − bps/10 000).
pub fn apply_slippage_sell(close: f64, slippage_bps: f64) -> f64 {
    close * (1.0 - slippage_bps / 10_000.0)
}

/// Floor to whole shares, tolerating the rounding error of
/// `value * cash / price`.
fn whole_shares(shares: f64) -> f64 {
    (shares * (1.0 + SHARE_ROUNDING)).floor()
}

/// Whole shares to buy at `execution_price`, capped so that cost plus
/// commission never exceeds `cash`. Zero means the entry is skipped.
pub fn size_position(
    sizing: &PositionSpec,
    cash: f64,
    execution_price: f64,
    config: &ExecutionConfig,
) -> Result<i64, RuntimeFault> {
    if !(execution_price.is_finite() && execution_price > 0.0) {
        return Err(RuntimeFault::new(format!(
            "invalid execution price {}",
            execution_price
        )));
    }
    if cash <= 0.0 {
        return Ok(0);
    }

    let budget = match sizing.sizing {
        SizingMode::PercentCash => sizing.value * cash,
        SizingMode::Fixed => sizing.value,
    };
    let wanted = whole_shares(budget / execution_price);
    let affordable = whole_shares(cash / (execution_price + config.commission_per_share));
    let shares = wanted.min(affordable).max(0.0);

    if !shares.is_finite() || shares >= i64::MAX as f64 {
        return Err(RuntimeFault::new(format!(
            "position quantity overflow ({} shares)",
            shares
        )));
    }

    let mut quantity = shares as i64;
    while quantity > 0
        && quantity as f64 * execution_price + calculate_commission(quantity, config) > cash
    {
        quantity -= 1;
    }
    Ok(quantity)
}

/// Result of an entry attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered(Fill),
    InsufficientCapital,
}

/// Enter a long position in slot `slot` at this bar's close.
///
/// Sizes first; when no whole share is affordable the slot stays Flat.
/// Otherwise the slot goes Flat → Entering → Open and the buy fill is
/// recorded.
pub fn enter_long(
    portfolio: &mut Portfolio,
    slot: usize,
    close: f64,
    timestamp: NaiveDateTime,
    sizing: &PositionSpec,
    config: &ExecutionConfig,
) -> Result<EntryResult, RuntimeFault> {
    let symbol = portfolio.slots[slot].symbol.clone();
    let execution_price = apply_slippage_buy(close, config.slippage_bps);
    let quantity = size_position(sizing, portfolio.cash, execution_price, config)
        .map_err(|f| f.at(&symbol, timestamp))?;

    if quantity == 0 {
        return Ok(EntryResult::InsufficientCapital);
    }

    let commission = calculate_commission(quantity, config);
    let cost = quantity as f64 * execution_price;

    let state = &mut portfolio.slots[slot].state;
    state.begin_entry().map_err(|f| f.at(&symbol, timestamp))?;
    state
        .complete_entry(Position {
            symbol: symbol.clone(),
            quantity,
            entry_price: execution_price,
            entry_timestamp: timestamp,
            entry_commission: commission,
            peak: close,
        })
        .map_err(|f| f.at(&symbol, timestamp))?;
    portfolio.cash -= cost + commission;

    let fill = Fill {
        symbol,
        side: Side::Buy,
        quantity,
        price: execution_price,
        commission,
        timestamp,
        realized_pnl: None,
        reason: None,
    };
    portfolio.record_fill(fill.clone());
    Ok(EntryResult::Entered(fill))
}

/// Close the open position in slot `slot` at this bar's close.
///
/// Open → Exiting → Flat; realized P&L is net of both commissions.
pub fn exit_position(
    portfolio: &mut Portfolio,
    slot: usize,
    close: f64,
    timestamp: NaiveDateTime,
    reason: ExitKind,
    config: &ExecutionConfig,
) -> Result<Fill, RuntimeFault> {
    let symbol = portfolio.slots[slot].symbol.clone();
    let state = &mut portfolio.slots[slot].state;
    state
        .begin_exit(reason)
        .map_err(|f| f.at(&symbol, timestamp))?;
    let (position, reason) = state
        .complete_exit()
        .map_err(|f| f.at(&symbol, timestamp))?;

    let exit_price = apply_slippage_sell(close, config.slippage_bps);
    let exit_value = position.quantity as f64 * exit_price;
    let exit_commission = calculate_commission(position.quantity, config);
    let pnl = position.quantity as f64 * (exit_price - position.entry_price)
        - position.entry_commission
        - exit_commission;

    portfolio.cash += exit_value - exit_commission;

    let fill = Fill {
        symbol,
        side: Side::Sell,
        quantity: position.quantity,
        price: exit_price,
        commission: exit_commission,
        timestamp,
        realized_pnl: Some(pnl),
        reason: Some(reason),
    };
    portfolio.record_fill(fill.clone());
    Ok(fill)
}
