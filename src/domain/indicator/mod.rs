//! Technical indicators computed over a close-price series.
//!
//! Every calculation returns one value per input bar; `None` marks the warmup
//! region where the indicator is not yet defined.
//! - `IndicatorType`: indicator identity plus parameters, resolved once at compile time
//! - `IndicatorField`: which output of a multi-valued indicator a column carries
//! - `IndicatorOutput`: the computed values, one vector per output field

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;

use std::fmt;

/// Default period for SMA, EMA and RSI when a document leaves it out.
pub const DEFAULT_PERIOD: usize = 14;
pub const DEFAULT_BBANDS_PERIOD: usize = 20;
pub const DEFAULT_BBANDS_MULT_X100: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorField {
    Value,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    Upper,
    Middle,
    Lower,
}

impl IndicatorField {
    /// Attribute name used in program text (`macd_12_26_9.signal`).
    /// `None` for single-valued indicators.
    pub fn attribute(self) -> Option<&'static str> {
        match self {
            IndicatorField::Value => None,
            IndicatorField::MacdLine => Some("line"),
            IndicatorField::MacdSignal => Some("signal"),
            IndicatorField::MacdHistogram => Some("histogram"),
            IndicatorField::Upper => Some("upper"),
            IndicatorField::Middle => Some("middle"),
            IndicatorField::Lower => Some("lower"),
        }
    }

    /// Every attribute name that may follow a series reference.
    pub const ATTRIBUTES: [&'static str; 6] =
        ["line", "signal", "histogram", "upper", "middle", "lower"];
}

impl IndicatorType {
    /// Call name in program text.
    pub fn call_name(&self) -> &'static str {
        match self {
            IndicatorType::Sma(_) => "SMA",
            IndicatorType::Ema(_) => "EMA",
            IndicatorType::Rsi(_) => "RSI",
            IndicatorType::Macd { .. } => "MACD",
            IndicatorType::Bollinger { .. } => "BBANDS",
        }
    }

    /// Deterministic series name derived from identity and parameters, so
    /// identical sub-expressions share one computed series.
    pub fn series_name(&self) -> String {
        match self {
            IndicatorType::Sma(n) => format!("sma_{n}"),
            IndicatorType::Ema(n) => format!("ema_{n}"),
            IndicatorType::Rsi(n) => format!("rsi_{n}"),
            IndicatorType::Macd { fast, slow, signal } => format!("macd_{fast}_{slow}_{signal}"),
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                if stddev_mult_x100 % 100 == 0 {
                    format!("bbands_{period}_{}", stddev_mult_x100 / 100)
                } else {
                    format!(
                        "bbands_{period}_{}p{:02}",
                        stddev_mult_x100 / 100,
                        stddev_mult_x100 % 100
                    )
                }
            }
        }
    }

    /// Integer parameters as written in program text, in call order.
    pub fn params(&self) -> Vec<String> {
        match self {
            IndicatorType::Sma(n) | IndicatorType::Ema(n) | IndicatorType::Rsi(n) => {
                vec![n.to_string()]
            }
            IndicatorType::Macd { fast, slow, signal } => {
                vec![fast.to_string(), slow.to_string(), signal.to_string()]
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => vec![period.to_string(), format_mult(*stddev_mult_x100)],
        }
    }

    pub fn fields(&self) -> &'static [IndicatorField] {
        match self {
            IndicatorType::Sma(_) | IndicatorType::Ema(_) | IndicatorType::Rsi(_) => {
                &[IndicatorField::Value]
            }
            IndicatorType::Macd { .. } => &[
                IndicatorField::MacdLine,
                IndicatorField::MacdSignal,
                IndicatorField::MacdHistogram,
            ],
            IndicatorType::Bollinger { .. } => &[
                IndicatorField::Upper,
                IndicatorField::Middle,
                IndicatorField::Lower,
            ],
        }
    }

    pub fn default_field(&self) -> IndicatorField {
        match self {
            IndicatorType::Bollinger { .. } => IndicatorField::Middle,
            _ => self.fields()[0],
        }
    }

    /// Look up an output by attribute name. `None` when the indicator has no
    /// such output.
    pub fn field_by_attribute(&self, name: &str) -> Option<IndicatorField> {
        self.fields()
            .iter()
            .copied()
            .find(|f| f.attribute() == Some(name))
    }

    /// Number of leading bars for which `field` is undefined.
    pub fn warmup(&self, field: IndicatorField) -> usize {
        match (self, field) {
            (IndicatorType::Sma(n), _) | (IndicatorType::Ema(n), _) => n.saturating_sub(1),
            (IndicatorType::Rsi(n), _) => *n,
            (IndicatorType::Macd { fast, slow, .. }, IndicatorField::MacdLine) => {
                (*fast).max(*slow).saturating_sub(1)
            }
            (IndicatorType::Macd { fast, slow, signal }, _) => {
                ((*fast).max(*slow) + signal).saturating_sub(2)
            }
            (IndicatorType::Bollinger { period, .. }, _) => period.saturating_sub(1),
        }
    }

    /// Bars needed before `field` produces its first value.
    pub fn required_bars(&self, field: IndicatorField) -> usize {
        self.warmup(field) + 1
    }

    pub fn compute(&self, closes: &[f64]) -> IndicatorOutput {
        match *self {
            IndicatorType::Sma(n) => IndicatorOutput::Single(calculate_sma(closes, n)),
            IndicatorType::Ema(n) => IndicatorOutput::Single(calculate_ema(closes, n)),
            IndicatorType::Rsi(n) => IndicatorOutput::Single(calculate_rsi(closes, n)),
            IndicatorType::Macd { fast, slow, signal } => calculate_macd(closes, fast, slow, signal),
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => calculate_bollinger(closes, period, stddev_mult_x100),
        }
    }
}

fn format_mult(stddev_mult_x100: u32) -> String {
    if stddev_mult_x100 % 100 == 0 {
        (stddev_mult_x100 / 100).to_string()
    } else {
        format!("{}.{:02}", stddev_mult_x100 / 100, stddev_mult_x100 % 100)
    }
}

/// Computed indicator values, aligned one-to-one with the input closes.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorOutput {
    Single(Vec<Option<f64>>),
    Macd {
        line: Vec<Option<f64>>,
        signal: Vec<Option<f64>>,
        histogram: Vec<Option<f64>>,
    },
    Bands {
        upper: Vec<Option<f64>>,
        middle: Vec<Option<f64>>,
        lower: Vec<Option<f64>>,
    },
}

impl IndicatorOutput {
    /// Values for one output field; `None` if the field does not belong to
    /// this indicator.
    pub fn field(&self, field: IndicatorField) -> Option<&[Option<f64>]> {
        match (self, field) {
            (IndicatorOutput::Single(v), IndicatorField::Value) => Some(v),
            (IndicatorOutput::Macd { line, .. }, IndicatorField::MacdLine) => Some(line),
            (IndicatorOutput::Macd { signal, .. }, IndicatorField::MacdSignal) => Some(signal),
            (IndicatorOutput::Macd { histogram, .. }, IndicatorField::MacdHistogram) => {
                Some(histogram)
            }
            (IndicatorOutput::Bands { upper, .. }, IndicatorField::Upper) => Some(upper),
            (IndicatorOutput::Bands { middle, .. }, IndicatorField::Middle) => Some(middle),
            (IndicatorOutput::Bands { lower, .. }, IndicatorField::Lower) => Some(lower),
            _ => None,
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.call_name(), self.params().join(","))
    }
}
