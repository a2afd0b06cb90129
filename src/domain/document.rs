//! Strategy document model.
//!
//! The JSON wire shape is authoritative: anything the text-to-structure
//! collaborator emits must deserialize and serialize back unchanged, including
//! indicator names and exit rule types the compiler will later reject.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::StratrunError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDocument {
    pub name: String,
    pub universe: Vec<String>,
    pub timeframe: Timeframe,
    pub entry: Vec<Condition>,
    pub exit: Vec<ExitRule>,
    pub position: PositionSpec,
    pub costs: Costs,
}

impl StrategyDocument {
    pub fn from_json(input: &str) -> Result<Self, StratrunError> {
        serde_json::from_str(input).map_err(|e| StratrunError::DocumentParse {
            reason: e.to_string(),
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, StratrunError> {
        serde_json::to_string_pretty(self).map_err(|e| StratrunError::DocumentParse {
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeframe {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
}

impl Timeframe {
    /// Bar interval, `1d` when the document leaves it out.
    pub fn interval(&self) -> Interval {
        self.interval.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "1h")]
    Hourly,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
}

impl Interval {
    /// Bars per year, used to annualize Sharpe and Sortino.
    pub fn periods_per_year(self) -> f64 {
        match self {
            Interval::Daily => 252.0,
            Interval::Hourly => 252.0 * 6.5,
            Interval::FifteenMinutes => 252.0 * 26.0,
            Interval::FiveMinutes => 252.0 * 78.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Hourly => "1h",
            Interval::FifteenMinutes => "15m",
            Interval::FiveMinutes => "5m",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Indicator(IndicatorCondition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorCondition {
    pub ind: IndicatorName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub op: Comparison,
    pub rhs: Rhs,
}

impl IndicatorCondition {
    /// The left-hand side viewed as an indicator reference.
    pub fn lhs(&self) -> IndicatorRef {
        IndicatorRef {
            ind: self.ind.clone(),
            period: self.period,
            field: self.field.clone(),
        }
    }
}

/// Indicator name as written in the document. Names outside the supported
/// set are kept verbatim so the document round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IndicatorName {
    Sma,
    Ema,
    Rsi,
    Macd,
    Bbands,
    Other(String),
}

impl From<String> for IndicatorName {
    fn from(name: String) -> Self {
        match name.as_str() {
            "SMA" => IndicatorName::Sma,
            "EMA" => IndicatorName::Ema,
            "RSI" => IndicatorName::Rsi,
            "MACD" => IndicatorName::Macd,
            "BBANDS" => IndicatorName::Bbands,
            _ => IndicatorName::Other(name),
        }
    }
}

impl From<IndicatorName> for String {
    fn from(name: IndicatorName) -> Self {
        name.to_string()
    }
}

impl fmt::Display for IndicatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorName::Sma => f.write_str("SMA"),
            IndicatorName::Ema => f.write_str("EMA"),
            IndicatorName::Rsi => f.write_str("RSI"),
            IndicatorName::Macd => f.write_str("MACD"),
            IndicatorName::Bbands => f.write_str("BBANDS"),
            IndicatorName::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = "==")]
    Equal,
}

impl Comparison {
    /// Primitive name used in program text.
    pub fn primitive(self) -> &'static str {
        match self {
            Comparison::Greater => "GT",
            Comparison::Less => "LT",
            Comparison::GreaterEqual => "GE",
            Comparison::LessEqual => "LE",
            Comparison::Equal => "EQ",
        }
    }

    pub fn from_primitive(name: &str) -> Option<Self> {
        match name {
            "GT" => Some(Comparison::Greater),
            "LT" => Some(Comparison::Less),
            "GE" => Some(Comparison::GreaterEqual),
            "LE" => Some(Comparison::LessEqual),
            "EQ" => Some(Comparison::Equal),
            _ => None,
        }
    }
}

/// Right-hand side of a condition: a literal threshold or another indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rhs {
    Literal(f64),
    Indicator(IndicatorRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRef {
    pub ind: IndicatorName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExitRule", into = "RawExitRule")]
pub enum ExitRule {
    TrailingStop { percent: f64 },
    TakeProfit { percent: f64 },
    ProfitTarget { percent: f64 },
    StopLoss { percent: f64 },
    /// An exit type outside the supported set, kept for round-tripping.
    Unrecognized { kind: String, percent: Option<f64> },
}

impl ExitRule {
    pub fn type_name(&self) -> &str {
        match self {
            ExitRule::TrailingStop { .. } => "trailing_stop",
            ExitRule::TakeProfit { .. } => "take_profit",
            ExitRule::ProfitTarget { .. } => "profit_target",
            ExitRule::StopLoss { .. } => "stop_loss",
            ExitRule::Unrecognized { kind, .. } => kind,
        }
    }

    pub fn percent(&self) -> Option<f64> {
        match self {
            ExitRule::TrailingStop { percent }
            | ExitRule::TakeProfit { percent }
            | ExitRule::ProfitTarget { percent }
            | ExitRule::StopLoss { percent } => Some(*percent),
            ExitRule::Unrecognized { percent, .. } => *percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RawExitRule {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    percent: Option<f64>,
}

impl TryFrom<RawExitRule> for ExitRule {
    type Error = String;

    fn try_from(raw: RawExitRule) -> Result<Self, Self::Error> {
        let known = |percent: Option<f64>| {
            percent.ok_or_else(|| format!("exit rule `{}` requires a percent", raw.kind))
        };
        match raw.kind.as_str() {
            "trailing_stop" => Ok(ExitRule::TrailingStop {
                percent: known(raw.percent)?,
            }),
            "take_profit" => Ok(ExitRule::TakeProfit {
                percent: known(raw.percent)?,
            }),
            "profit_target" => Ok(ExitRule::ProfitTarget {
                percent: known(raw.percent)?,
            }),
            "stop_loss" => Ok(ExitRule::StopLoss {
                percent: known(raw.percent)?,
            }),
            _ => Ok(ExitRule::Unrecognized {
                kind: raw.kind,
                percent: raw.percent,
            }),
        }
    }
}

impl From<ExitRule> for RawExitRule {
    fn from(rule: ExitRule) -> Self {
        RawExitRule {
            kind: rule.type_name().to_string(),
            percent: rule.percent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSpec {
    pub sizing: SizingMode,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_positions: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    PercentCash,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Costs {
    pub commission_per_share: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_bps: Option<f64>,
}
