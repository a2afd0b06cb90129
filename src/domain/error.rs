//! Domain error types.
//!
//! Each pipeline stage has its own error so callers can tell a document that
//! needs fixing from data that is missing or a run that blew its budget.

use chrono::{NaiveDate, NaiveDateTime};
use std::time::Duration;

/// A parse error with position information for program text parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// 1-based (line, column) of the error position.
    pub fn line_col(&self, input: &str) -> (usize, usize) {
        let position = self.position.min(input.len());
        let before = &input[..position];
        let line = before.matches('\n').count() + 1;
        let column = position - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
        (line, column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error("unsupported indicator")]
    UnresolvedIndicator,

    #[error("unrecognized exit rule type")]
    UnrecognizedExitRule,

    #[error("position sizing value out of range")]
    SizingOutOfRange,

    #[error("max_positions must be at least 1")]
    MaxPositionsOutOfRange,

    #[error("invalid indicator period")]
    InvalidPeriod,

    #[error("invalid indicator output field")]
    InvalidField,

    #[error("literal must be a finite number")]
    InvalidLiteral,

    #[error("exit percent must be strictly between 0 and 1")]
    PercentOutOfRange,

    #[error("cost must be finite and non-negative")]
    InvalidCost,

    #[error("universe must be a non-empty list of distinct symbols")]
    InvalidUniverse,

    #[error("timeframe start must be before end")]
    InvalidTimeframe,
}

/// Compilation failure, located by the document field path that caused it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}: {kind} (found {value})")]
pub struct CompileError {
    pub path: String,
    pub value: String,
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub fn new(path: impl Into<String>, value: impl ToString, kind: CompileErrorKind) -> Self {
        Self {
            path: path.into(),
            value: value.to_string(),
            kind,
        }
    }
}

/// Requested market data is unavailable or unusable. Raised before the
/// simulation starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataGapError {
    #[error("no bars for {symbol} between {start} and {end}")]
    NoBars {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("failed to fetch {symbol}: {reason}")]
    Fetch { symbol: String, reason: String },

    #[error("bars for {symbol} are not strictly increasing at {timestamp}")]
    UnorderedBars {
        symbol: String,
        timestamp: NaiveDateTime,
    },

    #[error("bar for {symbol} at {timestamp} lies outside {start} to {end}")]
    OutOfRange {
        symbol: String,
        timestamp: NaiveDateTime,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("no bar for {symbol} at {timestamp}")]
    MissingBar {
        symbol: String,
        timestamp: NaiveDateTime,
    },

    #[error("invalid price for {symbol} at {timestamp}")]
    InvalidPrice {
        symbol: String,
        timestamp: NaiveDateTime,
    },

    #[error("column {column} for {symbol} has {found} values, expected {expected}")]
    ColumnLength {
        symbol: String,
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("column {column} for {symbol} is not aligned with bars at {timestamp}")]
    ColumnMisaligned {
        symbol: String,
        column: String,
        timestamp: NaiveDateTime,
    },

    #[error("column {column} for {symbol} has no value at {timestamp}")]
    ColumnGap {
        symbol: String,
        column: String,
        timestamp: NaiveDateTime,
    },

    #[error("insufficient history for {column} on {symbol}: have {bars} bars, need {required}")]
    InsufficientHistory {
        symbol: String,
        column: String,
        bars: usize,
        required: usize,
    },
}

impl DataGapError {
    pub fn symbol(&self) -> &str {
        match self {
            DataGapError::NoBars { symbol, .. }
            | DataGapError::Fetch { symbol, .. }
            | DataGapError::UnorderedBars { symbol, .. }
            | DataGapError::OutOfRange { symbol, .. }
            | DataGapError::MissingBar { symbol, .. }
            | DataGapError::InvalidPrice { symbol, .. }
            | DataGapError::ColumnLength { symbol, .. }
            | DataGapError::ColumnMisaligned { symbol, .. }
            | DataGapError::ColumnGap { symbol, .. }
            | DataGapError::InsufficientHistory { symbol, .. } => symbol,
        }
    }
}

/// The simulation was interrupted at a bar boundary. Partial state is discarded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationAbort {
    #[error("simulation exceeded its {budget:?} budget after {bars_processed} bars")]
    DeadlineExceeded {
        budget: Duration,
        bars_processed: usize,
    },

    #[error("simulation cancelled after {bars_processed} bars")]
    Cancelled { bars_processed: usize },
}

/// Unexpected failure inside the simulation loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("runtime fault{}{}: {detail}",
    symbol.as_ref().map(|s| format!(" on {s}")).unwrap_or_default(),
    timestamp.map(|t| format!(" at {t}")).unwrap_or_default())]
pub struct RuntimeFault {
    pub symbol: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
    pub detail: String,
}

impl RuntimeFault {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            symbol: None,
            timestamp: None,
            detail: detail.into(),
        }
    }

    pub fn at(mut self, symbol: &str, timestamp: NaiveDateTime) -> Self {
        self.symbol = Some(symbol.to_string());
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Aborted(#[from] SimulationAbort),

    #[error(transparent)]
    Fault(#[from] RuntimeFault),
}

/// Top-level error type for stratrun.
#[derive(Debug, thiserror::Error)]
pub enum StratrunError {
    #[error("invalid strategy document: {reason}")]
    DocumentParse { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("generated program rejected with {count} violation(s)")]
    Rejected { count: usize },

    #[error(transparent)]
    DataGap(#[from] DataGapError),

    #[error(transparent)]
    Timeout(#[from] SimulationAbort),

    #[error(transparent)]
    Runtime(#[from] RuntimeFault),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SimulationError> for StratrunError {
    fn from(err: SimulationError) -> Self {
        match err {
            SimulationError::Aborted(abort) => StratrunError::Timeout(abort),
            SimulationError::Fault(fault) => StratrunError::Runtime(fault),
        }
    }
}

impl StratrunError {
    /// Process exit status for this failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            StratrunError::Io(_) => 1,
            StratrunError::ConfigParse { .. }
            | StratrunError::ConfigMissing { .. }
            | StratrunError::ConfigInvalid { .. } => 2,
            StratrunError::DataGap(_) => 3,
            StratrunError::DocumentParse { .. } | StratrunError::Compile(_) => 4,
            StratrunError::Rejected { .. } => 5,
            StratrunError::Timeout(_) => 6,
            StratrunError::Runtime(_) => 7,
        }
    }
}

impl From<&StratrunError> for std::process::ExitCode {
    fn from(err: &StratrunError) -> Self {
        std::process::ExitCode::from(err.exit_code())
    }
}
