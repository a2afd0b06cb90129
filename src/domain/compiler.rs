//! Strategy compiler: `StrategyDocument` → `CompiledArtifact`.
//!
//! Compilation is pure. Indicators are resolved once into `IndicatorType`
//! values and assigned deterministic series names in document order, the
//! entry list is lowered into a single conjunction and the exit list into
//! ordered checks. Sizing and costs are carried through as simulation
//! parameters. Every failure names the document field path that caused it.

use chrono::NaiveDate;
use std::collections::BTreeSet;

use super::document::{
    Condition, ExitRule, IndicatorName, IndicatorRef, Interval, PositionSpec, Rhs, SizingMode,
    StrategyDocument,
};
use super::error::{CompileError, CompileErrorKind};
use super::execution::ExecutionConfig;
use super::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use super::indicator::{
    DEFAULT_BBANDS_MULT_X100, DEFAULT_BBANDS_PERIOD, DEFAULT_PERIOD, IndicatorField, IndicatorType,
};
use super::program::{ExitKind, FeedIndex, Operand, Program, ProgramBuilder};

/// Largest indicator period accepted.
pub const MAX_PERIOD: usize = 10_000;

/// Simulation parameters carried through from the document unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub name: String,
    pub universe: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub interval: Interval,
    pub position: PositionSpec,
    pub costs: ExecutionConfig,
}

/// Output of compilation. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArtifact {
    source: String,
    program: Program,
    feed_index: FeedIndex,
    params: SimulationParams,
}

impl CompiledArtifact {
    /// Assemble an artifact from parts. `compile` is the normal way to get
    /// one; the validator decides whether parts assembled by hand may run.
    pub fn new(
        source: String,
        program: Program,
        feed_index: FeedIndex,
        params: SimulationParams,
    ) -> Self {
        Self {
            source,
            program,
            feed_index,
            params,
        }
    }

    /// Canonical program text; this is what the validator inspects.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn feed_index(&self) -> &FeedIndex {
        &self.feed_index
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }
}

pub fn compile(document: &StrategyDocument) -> Result<CompiledArtifact, CompileError> {
    check_universe(&document.universe)?;

    let timeframe = &document.timeframe;
    if timeframe.start >= timeframe.end {
        return Err(CompileError::new(
            "timeframe.end",
            timeframe.end,
            CompileErrorKind::InvalidTimeframe,
        ));
    }

    let mut builder = ProgramBuilder::new();

    for (i, condition) in document.entry.iter().enumerate() {
        let Condition::Indicator(cond) = condition;
        let path = format!("entry[{i}]");
        let (lhs_ind, lhs_field) = resolve(&cond.lhs(), &path)?;
        let rhs = match &cond.rhs {
            Rhs::Literal(v) if v.is_finite() => ResolvedRhs::Literal(*v),
            Rhs::Literal(v) => {
                return Err(CompileError::new(
                    format!("{path}.rhs"),
                    v,
                    CompileErrorKind::InvalidLiteral,
                ));
            }
            Rhs::Indicator(r) => {
                let (ind, field) = resolve(r, &format!("{path}.rhs"))?;
                ResolvedRhs::Indicator(ind, field)
            }
        };

        let lhs_series = builder.series(lhs_ind);
        let lhs = builder.column(lhs_series, lhs_field);
        let operand = match rhs {
            ResolvedRhs::Literal(v) => Operand::Literal(v),
            ResolvedRhs::Indicator(ind, field) => {
                let series = builder.series(ind);
                Operand::Column(builder.column(series, field))
            }
        };
        builder.predicate(lhs, cond.op, operand);
    }

    for (i, rule) in document.exit.iter().enumerate() {
        let kind = match rule {
            ExitRule::TrailingStop { .. } => ExitKind::TrailingStop,
            ExitRule::TakeProfit { .. } => ExitKind::TakeProfit,
            ExitRule::ProfitTarget { .. } => ExitKind::ProfitTarget,
            ExitRule::StopLoss { .. } => ExitKind::StopLoss,
            ExitRule::Unrecognized { kind, .. } => {
                return Err(CompileError::new(
                    format!("exit[{i}].type"),
                    kind,
                    CompileErrorKind::UnrecognizedExitRule,
                ));
            }
        };
        let percent = rule.percent().unwrap_or(f64::NAN);
        if !(percent > 0.0 && percent < 1.0) {
            return Err(CompileError::new(
                format!("exit[{i}].percent"),
                percent,
                CompileErrorKind::PercentOutOfRange,
            ));
        }
        builder.exit(kind, percent);
    }

    check_position(&document.position)?;
    let costs = check_costs(document)?;

    let program = builder.build();
    let feed_index = program.feed_index();
    let source = program.to_string();

    Ok(CompiledArtifact {
        source,
        program,
        feed_index,
        params: SimulationParams {
            name: document.name.clone(),
            universe: document.universe.clone(),
            start: timeframe.start,
            end: timeframe.end,
            interval: timeframe.interval(),
            position: document.position.clone(),
            costs,
        },
    })
}

enum ResolvedRhs {
    Literal(f64),
    Indicator(IndicatorType, IndicatorField),
}

/// Ticker-like: ASCII letters, digits and `. - ^ _`.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '_'))
}

fn check_universe(universe: &[String]) -> Result<(), CompileError> {
    if universe.is_empty() {
        return Err(CompileError::new("universe", "[]", CompileErrorKind::InvalidUniverse));
    }
    let mut seen = BTreeSet::new();
    for (i, symbol) in universe.iter().enumerate() {
        if !is_valid_symbol(symbol) || !seen.insert(symbol.as_str()) {
            return Err(CompileError::new(
                format!("universe[{i}]"),
                symbol,
                CompileErrorKind::InvalidUniverse,
            ));
        }
    }
    Ok(())
}

/// Resolve an indicator reference to its type and selected output.
fn resolve(reference: &IndicatorRef, path: &str) -> Result<(IndicatorType, IndicatorField), CompileError> {
    if let Some(period) = reference.period {
        if period == 0 || period > MAX_PERIOD {
            return Err(CompileError::new(
                format!("{path}.period"),
                period,
                CompileErrorKind::InvalidPeriod,
            ));
        }
    }

    let indicator = match &reference.ind {
        IndicatorName::Sma => IndicatorType::Sma(reference.period.unwrap_or(DEFAULT_PERIOD)),
        IndicatorName::Ema => IndicatorType::Ema(reference.period.unwrap_or(DEFAULT_PERIOD)),
        IndicatorName::Rsi => IndicatorType::Rsi(reference.period.unwrap_or(DEFAULT_PERIOD)),
        IndicatorName::Macd => IndicatorType::Macd {
            fast: DEFAULT_FAST,
            slow: DEFAULT_SLOW,
            signal: DEFAULT_SIGNAL,
        },
        IndicatorName::Bbands => IndicatorType::Bollinger {
            period: reference.period.unwrap_or(DEFAULT_BBANDS_PERIOD),
            stddev_mult_x100: DEFAULT_BBANDS_MULT_X100,
        },
        IndicatorName::Other(name) => {
            return Err(CompileError::new(
                format!("{path}.ind"),
                name,
                CompileErrorKind::UnresolvedIndicator,
            ));
        }
    };

    let field = match &reference.field {
        None => indicator.default_field(),
        Some(name) => indicator.field_by_attribute(name).ok_or_else(|| {
            CompileError::new(format!("{path}.field"), name, CompileErrorKind::InvalidField)
        })?,
    };

    Ok((indicator, field))
}

fn check_position(position: &PositionSpec) -> Result<(), CompileError> {
    let v = position.value;
    let in_range = match position.sizing {
        SizingMode::PercentCash => v > 0.0 && v <= 1.0,
        SizingMode::Fixed => v > 0.0 && v.is_finite(),
    };
    if !in_range {
        return Err(CompileError::new(
            "position.value",
            v,
            CompileErrorKind::SizingOutOfRange,
        ));
    }
    if position.max_positions == Some(0) {
        return Err(CompileError::new(
            "position.max_positions",
            0,
            CompileErrorKind::MaxPositionsOutOfRange,
        ));
    }
    Ok(())
}

fn check_costs(document: &StrategyDocument) -> Result<ExecutionConfig, CompileError> {
    let valid = |v: f64| v.is_finite() && v >= 0.0;
    let commission = document.costs.commission_per_share;
    if !valid(commission) {
        return Err(CompileError::new(
            "costs.commission_per_share",
            commission,
            CompileErrorKind::InvalidCost,
        ));
    }
    let slippage = document.costs.slippage_bps.unwrap_or(0.0);
    if !valid(slippage) || slippage >= 10_000.0 {
        return Err(CompileError::new(
            "costs.slippage_bps",
            slippage,
            CompileErrorKind::InvalidCost,
        ));
    }
    Ok(ExecutionConfig {
        commission_per_share: commission,
        slippage_bps: slippage,
    })
}
