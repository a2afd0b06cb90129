//! Program evaluation against one bar.
//!
//! # Evaluation Semantics
//!
//! - Entry: conjunction of every predicate, short-circuiting on the first
//!   `false`. An empty entry never fires.
//! - A column without a value on this bar (warmup) makes its predicate false.
//! - `EQ` compares within `EPSILON`.
//! - Exits: checked in program order against the bar's close; the first
//!   check that fires is the exit reason.

use super::document::Comparison;
use super::position::Position;
use super::program::{ExitKind, Operand, Program};

const EPSILON: f64 = 1e-9;

pub fn compare(lhs: f64, op: Comparison, rhs: f64) -> bool {
    match op {
        Comparison::Greater => lhs > rhs,
        Comparison::Less => lhs < rhs,
        Comparison::GreaterEqual => lhs >= rhs,
        Comparison::LessEqual => lhs <= rhs,
        Comparison::Equal => (lhs - rhs).abs() < EPSILON,
    }
}

/// Evaluate the entry conjunction. `column` yields the value of program
/// column `i` on the current bar.
pub fn entry_signal<F>(program: &Program, column: F) -> bool
where
    F: Fn(usize) -> Option<f64>,
{
    if program.entry.is_empty() {
        return false;
    }
    program.entry.iter().all(|pred| {
        let Some(lhs) = column(pred.lhs) else {
            return false;
        };
        let rhs = match pred.rhs {
            Operand::Column(c) => column(c),
            Operand::Literal(v) => Some(v),
        };
        match rhs {
            Some(rhs) if lhs.is_finite() && rhs.is_finite() => compare(lhs, pred.op, rhs),
            _ => false,
        }
    })
}

/// First exit check that fires for `position` at `close`, if any. The
/// position's trailing peak must already include this bar's high.
pub fn first_exit(program: &Program, position: &Position, close: f64) -> Option<ExitKind> {
    program.exits.iter().find_map(|check| {
        let hit = match check.kind {
            ExitKind::StopLoss => position.stop_loss_hit(close, check.percent),
            ExitKind::TakeProfit | ExitKind::ProfitTarget => {
                position.take_profit_hit(close, check.percent)
            }
            ExitKind::TrailingStop => position.trailing_stop_hit(close, check.percent),
        };
        hit.then_some(check.kind)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::{IndicatorField, IndicatorType};
    use crate::domain::program::ProgramBuilder;
    use chrono::NaiveDate;

    /// entry: sma_50 > sma_200 AND rsi_14 < 70
    fn sma_rsi_program() -> Program {
        let mut b = ProgramBuilder::new();
        let s50 = b.series(IndicatorType::Sma(50));
        let s200 = b.series(IndicatorType::Sma(200));
        let rsi = b.series(IndicatorType::Rsi(14));
        let c50 = b.column(s50, IndicatorField::Value);
        let c200 = b.column(s200, IndicatorField::Value);
        b.predicate(c50, Comparison::Greater, Operand::Column(c200));
        let crsi = b.column(rsi, IndicatorField::Value);
        b.predicate(crsi, Comparison::Less, Operand::Literal(70.0));
        b.build()
    }

    fn position(entry_price: f64, peak: f64) -> Position {
        Position {
            symbol: "AAPL".into(),
            quantity: 10,
            entry_price,
            entry_timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            entry_commission: 0.0,
            peak,
        }
    }

    #[test]
    fn compare_operators() {
        assert!(compare(2.0, Comparison::Greater, 1.0));
        assert!(!compare(1.0, Comparison::Greater, 1.0));
        assert!(compare(1.0, Comparison::GreaterEqual, 1.0));
        assert!(compare(0.5, Comparison::Less, 1.0));
        assert!(compare(1.0, Comparison::LessEqual, 1.0));
        assert!(compare(1.0, Comparison::Equal, 1.0 + 1e-12));
        assert!(!compare(1.0, Comparison::Equal, 1.001));
    }

    #[test]
    fn entry_requires_every_condition() {
        let program = sma_rsi_program();
        let values = [Some(110.0), Some(100.0), Some(65.0)];
        assert!(entry_signal(&program, |c| values[c]));

        let overbought = [Some(110.0), Some(100.0), Some(75.0)];
        assert!(!entry_signal(&program, |c| overbought[c]));

        let below = [Some(90.0), Some(100.0), Some(65.0)];
        assert!(!entry_signal(&program, |c| below[c]));
    }

    #[test]
    fn missing_value_is_false() {
        let program = sma_rsi_program();
        let warmup = [Some(110.0), None, Some(65.0)];
        assert!(!entry_signal(&program, |c| warmup[c]));
    }

    #[test]
    fn nan_value_is_false() {
        let program = sma_rsi_program();
        let values = [Some(110.0), Some(100.0), Some(f64::NAN)];
        assert!(!entry_signal(&program, |c| values[c]));
    }

    #[test]
    fn empty_entry_never_fires() {
        let program = Program::default();
        assert!(!entry_signal(&program, |_| Some(1.0)));
    }

    #[test]
    fn first_listed_exit_wins() {
        let mut b = ProgramBuilder::new();
        b.exit(ExitKind::TrailingStop, 0.08);
        b.exit(ExitKind::TakeProfit, 0.15);
        let program = b.build();
        // peak 130 -> trailing level 119.6; take-profit level 115
        let pos = position(100.0, 130.0);
        assert_eq!(first_exit(&program, &pos, 118.0), Some(ExitKind::TrailingStop));

        let mut b = ProgramBuilder::new();
        b.exit(ExitKind::TakeProfit, 0.15);
        b.exit(ExitKind::TrailingStop, 0.08);
        let reversed = b.build();
        assert_eq!(first_exit(&reversed, &pos, 118.0), Some(ExitKind::TakeProfit));
    }

    #[test]
    fn no_exit_inside_band() {
        let mut b = ProgramBuilder::new();
        b.exit(ExitKind::StopLoss, 0.05);
        b.exit(ExitKind::ProfitTarget, 0.10);
        let program = b.build();
        let pos = position(100.0, 100.0);
        assert_eq!(first_exit(&program, &pos, 100.0), None);
        assert_eq!(first_exit(&program, &pos, 95.0), Some(ExitKind::StopLoss));
        assert_eq!(first_exit(&program, &pos, 110.0), Some(ExitKind::ProfitTarget));
    }
}
