//! MACD (Moving Average Convergence Divergence).
//!
//! Line = EMA(fast) - EMA(slow), Signal = EMA(signal) of the line seeded once
//! the line is defined, Histogram = Line - Signal.
//!
//! Warmup: the line is `None` for max(fast, slow) - 1 bars; signal and
//! histogram for a further signal - 1 bars.

use super::{IndicatorOutput, calculate_ema};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> IndicatorOutput {
    let len = closes.len();
    if fast == 0 || slow == 0 || signal == 0 {
        return IndicatorOutput::Macd {
            line: vec![None; len],
            signal: vec![None; len],
            histogram: vec![None; len],
        };
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);
    let line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    let line_start = line.iter().position(Option::is_some).unwrap_or(len);
    let defined: Vec<f64> = line[line_start..].iter().flatten().copied().collect();

    let mut signal_line = vec![None; line_start];
    signal_line.extend(calculate_ema(&defined, signal));

    let histogram = line
        .iter()
        .zip(signal_line.iter())
        .map(|(l, s)| Some((*l)? - (*s)?))
        .collect();

    IndicatorOutput::Macd {
        line,
        signal: signal_line,
        histogram,
    }
}
