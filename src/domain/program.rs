//! Restricted instruction set executed by the simulation engine.
//!
//! A `Program` is what the compiler emits: indicator series declarations, one
//! entry conjunction and an ordered list of exit checks. It renders to a
//! canonical line-oriented source text and parses back from it:
//!
//! ```text
//! # stratrun program v1
//! series sma_50 = SMA(close, 50)
//! series rsi_14 = RSI(close, 14)
//! entry ALL(GT(sma_50, 100), LT(rsi_14, 70))
//! exit TRAILING_STOP(0.08)
//! ```
//!
//! The parser is a character-level recursive descent parser. Errors carry the
//! byte offset of the offending input.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::document::Comparison;
use crate::domain::error::ParseError;
use crate::domain::indicator::{IndicatorField, IndicatorType};

pub const HEADER: &str = "# stratrun program v1";

/// The only bar field indicator series may be computed over.
pub const SOURCE_FIELD: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesDecl {
    pub name: String,
    pub indicator: IndicatorType,
}

/// One output column of a declared series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef {
    pub series: usize,
    pub field: IndicatorField,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Column(usize),
    Literal(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub lhs: usize,
    pub op: Comparison,
    pub rhs: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    TrailingStop,
    TakeProfit,
    ProfitTarget,
    StopLoss,
}

impl ExitKind {
    pub const ALL: [ExitKind; 4] = [
        ExitKind::TrailingStop,
        ExitKind::TakeProfit,
        ExitKind::ProfitTarget,
        ExitKind::StopLoss,
    ];

    pub fn primitive(self) -> &'static str {
        match self {
            ExitKind::TrailingStop => "TRAILING_STOP",
            ExitKind::TakeProfit => "TAKE_PROFIT",
            ExitKind::ProfitTarget => "PROFIT_TARGET",
            ExitKind::StopLoss => "STOP_LOSS",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExitKind::TrailingStop => "trailing_stop",
            ExitKind::TakeProfit => "take_profit",
            ExitKind::ProfitTarget => "profit_target",
            ExitKind::StopLoss => "stop_loss",
        }
    }

    pub fn from_primitive(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.primitive() == name)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitCheck {
    pub kind: ExitKind,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub series: Vec<SeriesDecl>,
    pub columns: Vec<ColumnRef>,
    /// Conjunction; an empty list never enters.
    pub entry: Vec<Predicate>,
    /// Evaluated in order, first match wins.
    pub exits: Vec<ExitCheck>,
}

/// A data-feed column the engine needs, keyed by its deterministic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedColumn {
    pub name: String,
    pub indicator: IndicatorType,
    pub field: IndicatorField,
}

/// Structural index from program columns to data-feed columns. Position `i`
/// describes `Program::columns[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedIndex {
    pub columns: Vec<FeedColumn>,
}

impl FeedIndex {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

impl Program {
    /// Reference text for a column: `sma_50` or `macd_12_26_9.signal`.
    pub fn column_ref_text(&self, column: usize) -> String {
        let col = self.columns[column];
        let series = &self.series[col.series];
        match col.field.attribute() {
            Some(attr) => format!("{}.{}", series.name, attr),
            None => series.name.clone(),
        }
    }

    /// Data-feed column name: `sma_50` or `macd_12_26_9_signal`.
    pub fn column_feed_name(&self, column: usize) -> String {
        let col = self.columns[column];
        let series = &self.series[col.series];
        match col.field.attribute() {
            Some(attr) => format!("{}_{}", series.name, attr),
            None => series.name.clone(),
        }
    }

    pub fn feed_index(&self) -> FeedIndex {
        FeedIndex {
            columns: (0..self.columns.len())
                .map(|i| FeedColumn {
                    name: self.column_feed_name(i),
                    indicator: self.series[self.columns[i].series].indicator,
                    field: self.columns[i].field,
                })
                .collect(),
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, operand: Operand) -> fmt::Result {
        match operand {
            Operand::Column(c) => f.write_str(&self.column_ref_text(c)),
            Operand::Literal(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", HEADER)?;
        for decl in &self.series {
            let mut args = vec![SOURCE_FIELD.to_string()];
            args.extend(decl.indicator.params());
            writeln!(
                f,
                "series {} = {}({})",
                decl.name,
                decl.indicator.call_name(),
                args.join(", ")
            )?;
        }
        if !self.entry.is_empty() {
            f.write_str("entry ALL(")?;
            for (i, pred) in self.entry.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}(", pred.op.primitive())?;
                self.write_operand(f, Operand::Column(pred.lhs))?;
                f.write_str(", ")?;
                self.write_operand(f, pred.rhs)?;
                f.write_str(")")?;
            }
            writeln!(f, ")")?;
        }
        for exit in &self.exits {
            writeln!(f, "exit {}({})", exit.kind.primitive(), exit.percent)?;
        }
        Ok(())
    }
}

/// Incremental construction shared by the compiler and the parser, so both
/// assign series and column indices in first-reference order.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the series computing `indicator`, declaring it if new.
    pub fn series(&mut self, indicator: IndicatorType) -> usize {
        if let Some(i) = self
            .program
            .series
            .iter()
            .position(|s| s.indicator == indicator)
        {
            return i;
        }
        self.program.series.push(SeriesDecl {
            name: indicator.series_name(),
            indicator,
        });
        self.program.series.len() - 1
    }

    pub fn column(&mut self, series: usize, field: IndicatorField) -> usize {
        let col = ColumnRef { series, field };
        if let Some(i) = self.program.columns.iter().position(|c| *c == col) {
            return i;
        }
        self.program.columns.push(col);
        self.program.columns.len() - 1
    }

    pub fn predicate(&mut self, lhs: usize, op: Comparison, rhs: Operand) {
        self.program.entry.push(Predicate { lhs, op, rhs });
    }

    pub fn exit(&mut self, kind: ExitKind, percent: f64) {
        self.program.exits.push(ExitCheck { kind, percent });
    }

    fn find_series(&self, name: &str) -> Option<usize> {
        self.program.series.iter().position(|s| s.name == name)
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Parse canonical program text.
pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(input);
    let mut builder = ProgramBuilder::new();
    let mut seen_entry = false;

    loop {
        parser.skip_blank_lines();
        if parser.at_end() {
            break;
        }
        if parser.consume_keyword("series") {
            parser.parse_series(&mut builder)?;
        } else if parser.consume_keyword("entry") {
            if seen_entry {
                return Err(parser.error("duplicate entry statement"));
            }
            seen_entry = true;
            parser.parse_entry(&mut builder)?;
        } else if parser.consume_keyword("exit") {
            parser.parse_exit(&mut builder)?;
        } else {
            let found = parser.peek_word();
            return Err(parser.error(format!(
                "expected 'series', 'entry' or 'exit', found '{}'",
                found
            )));
        }
        parser.expect_line_end()?;
    }

    Ok(builder.build())
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    /// Spaces and tabs only; newlines terminate statements.
    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    fn skip_comment(&mut self) {
        if self.peek() == Some('#') {
            while let Some(ch) = self.peek() {
                if ch == '\n' {
                    break;
                }
                self.advance();
            }
        }
    }

    fn skip_blank_lines(&mut self) {
        loop {
            self.skip_spaces();
            self.skip_comment();
            match self.peek() {
                Some('\n') | Some('\r') => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn expect_line_end(&mut self) -> Result<(), ParseError> {
        self.skip_spaces();
        self.skip_comment();
        match self.peek() {
            None => Ok(()),
            Some('\r') | Some('\n') => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected end of line, found '{}'", ch))),
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_spaces();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn consume_char(&mut self, expected: char) -> bool {
        self.skip_spaces();
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_spaces();
        match self.peek() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
            _ => {
                let found = self.peek_word();
                return Err(self.error(format!("expected identifier, found '{}'", found)));
            }
        }
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_spaces();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", text),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_spaces();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if start == self.pos {
            return Err(self.error("expected integer"));
        }
        let text = &self.input[start..self.pos];
        text.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", text),
            position: start,
        })
    }

    fn parse_multiplier(&mut self) -> Result<u32, ParseError> {
        let start = self.pos;
        let value = self.parse_number()?;
        let scaled = value * 100.0;
        if !(scaled >= 1.0 && scaled <= u32::MAX as f64) || (scaled - scaled.round()).abs() > 1e-9 {
            return Err(ParseError {
                message: format!("invalid band multiplier: {}", value),
                position: start,
            });
        }
        Ok(scaled.round() as u32)
    }

    /// `series <name> = <CALL>(close, <params>)`
    fn parse_series(&mut self, builder: &mut ProgramBuilder) -> Result<(), ParseError> {
        let name_pos = {
            self.skip_spaces();
            self.pos
        };
        let name = self.parse_identifier()?;
        if builder.find_series(&name).is_some() {
            return Err(ParseError {
                message: format!("series '{}' already declared", name),
                position: name_pos,
            });
        }
        self.expect_char('=')?;
        self.skip_spaces();
        let call_pos = self.pos;
        let call = self.parse_identifier()?;
        self.expect_char('(')?;
        self.skip_spaces();
        if !self.consume_keyword(SOURCE_FIELD) {
            let found = self.peek_word();
            return Err(self.error(format!("expected '{}', found '{}'", SOURCE_FIELD, found)));
        }

        let indicator = match call.as_str() {
            "SMA" | "EMA" | "RSI" => {
                self.expect_char(',')?;
                let period = self.parse_integer()?;
                match call.as_str() {
                    "SMA" => IndicatorType::Sma(period),
                    "EMA" => IndicatorType::Ema(period),
                    _ => IndicatorType::Rsi(period),
                }
            }
            "MACD" => {
                self.expect_char(',')?;
                let fast = self.parse_integer()?;
                self.expect_char(',')?;
                let slow = self.parse_integer()?;
                self.expect_char(',')?;
                let signal = self.parse_integer()?;
                IndicatorType::Macd { fast, slow, signal }
            }
            "BBANDS" => {
                self.expect_char(',')?;
                let period = self.parse_integer()?;
                self.expect_char(',')?;
                let stddev_mult_x100 = self.parse_multiplier()?;
                IndicatorType::Bollinger {
                    period,
                    stddev_mult_x100,
                }
            }
            other => {
                return Err(ParseError {
                    message: format!("unknown indicator '{}'", other),
                    position: call_pos,
                });
            }
        };
        self.expect_char(')')?;

        if indicator.series_name() != name {
            return Err(ParseError {
                message: format!(
                    "series '{}' must be named '{}'",
                    name,
                    indicator.series_name()
                ),
                position: name_pos,
            });
        }
        if builder.program.series.iter().any(|s| s.indicator == indicator) {
            return Err(ParseError {
                message: format!("{} already declared", indicator),
                position: call_pos,
            });
        }
        builder.series(indicator);
        Ok(())
    }

    /// `entry ALL(<CMP>(<ref>, <ref|number>), ...)`
    fn parse_entry(&mut self, builder: &mut ProgramBuilder) -> Result<(), ParseError> {
        self.skip_spaces();
        if !self.consume_keyword("ALL") {
            let found = self.peek_word();
            return Err(self.error(format!("expected 'ALL', found '{}'", found)));
        }
        self.expect_char('(')?;
        loop {
            self.parse_predicate(builder)?;
            if !self.consume_char(',') {
                break;
            }
        }
        self.expect_char(')')
    }

    fn parse_predicate(&mut self, builder: &mut ProgramBuilder) -> Result<(), ParseError> {
        self.skip_spaces();
        let op_pos = self.pos;
        let name = self.parse_identifier()?;
        let op = Comparison::from_primitive(&name).ok_or_else(|| ParseError {
            message: format!("expected comparison (GT, LT, GE, LE, EQ), found '{}'", name),
            position: op_pos,
        })?;
        self.expect_char('(')?;
        let lhs = self.parse_column_ref(builder)?;
        self.expect_char(',')?;
        self.skip_spaces();
        let rhs = match self.peek() {
            Some(ch) if ch == '-' || ch.is_ascii_digit() => Operand::Literal(self.parse_number()?),
            _ => Operand::Column(self.parse_column_ref(builder)?),
        };
        self.expect_char(')')?;
        builder.predicate(lhs, op, rhs);
        Ok(())
    }

    /// `<series>` or `<series>.<field>`
    fn parse_column_ref(&mut self, builder: &mut ProgramBuilder) -> Result<usize, ParseError> {
        self.skip_spaces();
        let ref_pos = self.pos;
        let name = self.parse_identifier()?;
        let series = builder.find_series(&name).ok_or_else(|| ParseError {
            message: format!("undeclared series '{}'", name),
            position: ref_pos,
        })?;
        let indicator = builder.program.series[series].indicator;

        let field = if self.peek() == Some('.') {
            self.advance();
            let attr_pos = self.pos;
            let attr = self.parse_identifier()?;
            indicator
                .field_by_attribute(&attr)
                .ok_or_else(|| ParseError {
                    message: format!("{} has no output '{}'", indicator, attr),
                    position: attr_pos,
                })?
        } else if indicator.fields().len() == 1 {
            IndicatorField::Value
        } else {
            return Err(self.error(format!(
                "series '{}' has several outputs; select one with '.'",
                name
            )));
        };

        Ok(builder.column(series, field))
    }

    /// `exit <PRIMITIVE>(<percent>)`
    fn parse_exit(&mut self, builder: &mut ProgramBuilder) -> Result<(), ParseError> {
        self.skip_spaces();
        let kind_pos = self.pos;
        let name = self.parse_identifier()?;
        let kind = ExitKind::from_primitive(&name).ok_or_else(|| ParseError {
            message: format!("unknown exit primitive '{}'", name),
            position: kind_pos,
        })?;
        self.expect_char('(')?;
        let percent = self.parse_number()?;
        self.expect_char(')')?;
        builder.exit(kind, percent);
        Ok(())
    }
}
