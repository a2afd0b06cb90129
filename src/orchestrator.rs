//! Backtest orchestrator.
//!
//! Sequences one run: compile → validate → load data → simulate → measure.
//! A rejected program stops before any data is requested. Every outcome,
//! including failures, is reported as a single immutable [`RunResult`].

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::backtest::{SimulationRun, run_backtest};
use crate::domain::compiler::{CompiledArtifact, compile};
use crate::domain::config_validation::{
    DEFAULT_TIMEOUT_SECS, benchmark_symbols, optional_f64, timeout_secs, validate_run_config,
};
use crate::domain::deadline::Deadline;
use crate::domain::document::StrategyDocument;
use crate::domain::error::{DataGapError, StratrunError};
use crate::domain::execution::Fill;
use crate::domain::feed::{InstrumentFeed, build_unified_timeline, check_coverage};
use crate::domain::metrics::{
    BenchmarkCurve, CoverageIssue, CoverageWarning, MetricsConfig, MetricsResult, dedup_symbols,
    measure,
};
use crate::domain::portfolio::EquityPoint;
use crate::domain::validator::{ValidationResult, Violation, validate};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{BenchmarkPort, MarketDataPort};

/// Run-level settings passed explicitly into the core.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub initial_cash: f64,
    /// Wall-clock budget for the simulation; `None` is unbounded.
    pub timeout: Option<Duration>,
    pub risk_free_rate: f64,
    pub benchmarks: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            risk_free_rate: 0.0,
            benchmarks: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Validate the `[backtest]` section and build settings from it.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StratrunError> {
        validate_run_config(config)?;
        let defaults = Self::default();
        Ok(Self {
            initial_cash: optional_f64(config, "backtest", "initial_cash")?
                .unwrap_or(defaults.initial_cash),
            timeout: timeout_secs(config)?
                .map(Duration::from_secs)
                .or(defaults.timeout),
            risk_free_rate: optional_f64(config, "backtest", "risk_free_rate")?
                .unwrap_or(defaults.risk_free_rate),
            benchmarks: benchmark_symbols(config),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Rejected,
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub exit_code: u8,
    pub message: String,
}

impl From<&StratrunError> for RunError {
    fn from(err: &StratrunError) -> Self {
        Self {
            exit_code: err.exit_code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub strategy: String,
    pub status: RunStatus,
    /// Canonical program text, once compilation succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub universe: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_cash: f64,
    pub final_equity: Option<f64>,
    pub equity_curve: Vec<EquityPoint>,
    pub fills: Vec<Fill>,
    pub metrics: Option<MetricsResult>,
    pub violations: Vec<Violation>,
    pub error: Option<RunError>,
}

impl RunResult {
    fn new(
        strategy: &str,
        universe: &[String],
        start: NaiveDate,
        end: NaiveDate,
        config: &RunConfig,
        status: RunStatus,
    ) -> Self {
        Self {
            strategy: strategy.to_string(),
            status,
            program: None,
            universe: universe.to_vec(),
            start,
            end,
            initial_cash: config.initial_cash,
            final_equity: None,
            equity_curve: Vec::new(),
            fills: Vec::new(),
            metrics: None,
            violations: Vec::new(),
            error: None,
        }
    }

    /// 0 on completion, otherwise the failure's exit status.
    pub fn exit_code(&self) -> u8 {
        match (&self.status, &self.error) {
            (RunStatus::Completed, _) => 0,
            (RunStatus::Rejected, _) => 5,
            (_, Some(err)) => err.exit_code,
            (RunStatus::Timeout, None) => 6,
            (RunStatus::Error, None) => 1,
        }
    }
}

struct Completed {
    run: SimulationRun,
    metrics: MetricsResult,
}

pub struct Orchestrator<'a> {
    market: &'a dyn MarketDataPort,
    benchmarks: &'a dyn BenchmarkPort,
    config: RunConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        market: &'a dyn MarketDataPort,
        benchmarks: &'a dyn BenchmarkPort,
        config: RunConfig,
    ) -> Self {
        Self {
            market,
            benchmarks,
            config,
            cancel: None,
        }
    }

    /// Abort the simulation at the next bar boundary once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run(&self, document: &StrategyDocument) -> RunResult {
        info!(strategy = %document.name, universe = document.universe.len(), "compiling strategy");
        match compile(document) {
            Ok(artifact) => self.run_artifact(&artifact),
            Err(err) => {
                warn!(strategy = %document.name, error = %err, "compilation failed");
                let mut result = RunResult::new(
                    &document.name,
                    &document.universe,
                    document.timeframe.start,
                    document.timeframe.end,
                    &self.config,
                    RunStatus::Error,
                );
                result.error = Some(RunError::from(&StratrunError::from(err)));
                result
            }
        }
    }

    /// Validate, then simulate and measure. A rejected artifact never
    /// reaches the data ports or the simulation engine.
    pub fn run_artifact(&self, artifact: &CompiledArtifact) -> RunResult {
        let params = artifact.params();
        let mut result = RunResult::new(
            &params.name,
            &params.universe,
            params.start,
            params.end,
            &self.config,
            RunStatus::Completed,
        );
        result.program = Some(artifact.source().to_string());
        debug!(series = artifact.program().series.len(), columns = artifact.feed_index().len(), "validating program");

        if let ValidationResult::Rejected(violations) = validate(artifact) {
            warn!(strategy = %params.name, count = violations.len(), "program rejected by safety validator");
            for violation in &violations {
                debug!(%violation, "violation");
            }
            result.status = RunStatus::Rejected;
            result.error = Some(RunError::from(&StratrunError::Rejected {
                count: violations.len(),
            }));
            result.violations = violations;
            return result;
        }

        match self.execute(artifact) {
            Ok(Completed { run, metrics }) => {
                info!(
                    strategy = %params.name,
                    bars = run.bars_processed,
                    fills = run.fills.len(),
                    total_return = metrics.total_return,
                    "run completed"
                );
                result.final_equity = Some(run.final_equity());
                result.equity_curve = run.equity_curve;
                result.fills = run.fills;
                result.metrics = Some(metrics);
            }
            Err(err) => {
                result.status = match &err {
                    StratrunError::Timeout(_) => {
                        warn!(strategy = %params.name, error = %err, "run timed out");
                        RunStatus::Timeout
                    }
                    StratrunError::Runtime(fault) => {
                        error!(
                            strategy = %params.name,
                            symbol = fault.symbol.as_deref().unwrap_or("-"),
                            timestamp = ?fault.timestamp,
                            detail = %fault.detail,
                            "runtime fault"
                        );
                        RunStatus::Error
                    }
                    _ => {
                        warn!(strategy = %params.name, error = %err, "run failed");
                        RunStatus::Error
                    }
                };
                result.error = Some(RunError::from(&err));
            }
        }
        result
    }

    /// Load, simulate and measure a validated artifact.
    fn execute(&self, artifact: &CompiledArtifact) -> Result<Completed, StratrunError> {
        let feeds = self
            .load_feeds(artifact)
            .and_then(|feeds| {
                check_coverage(&feeds, &build_unified_timeline(&feeds))?;
                Ok(feeds)
            })
            .inspect_err(|err| warn!(symbol = err.symbol(), error = %err, "market data unusable"))?;

        let mut deadline = match self.config.timeout {
            Some(budget) => Deadline::after(budget),
            None => Deadline::unbounded(),
        };
        if let Some(flag) = &self.cancel {
            deadline = deadline.with_cancel_flag(Arc::clone(flag));
        }

        info!(instruments = feeds.len(), "simulating");
        let run = run_backtest(artifact, &feeds, self.config.initial_cash, &deadline)?;

        let params = artifact.params();
        let (curves, unavailable) = self.load_benchmarks(params.start, params.end);
        let metrics_config = MetricsConfig {
            initial_equity: self.config.initial_cash,
            periods_per_year: params.interval.periods_per_year(),
            risk_free_rate: self.config.risk_free_rate,
        };
        let mut metrics = measure(&run.equity_curve, &run.fills, &curves, &metrics_config);
        for warning in unavailable {
            metrics.excess_returns.insert(warning.symbol.clone(), None);
            metrics.warnings.push(warning);
        }
        for warning in &metrics.warnings {
            warn!(%warning, "benchmark coverage");
        }

        Ok(Completed { run, metrics })
    }

    fn load_feeds(&self, artifact: &CompiledArtifact) -> Result<Vec<InstrumentFeed>, DataGapError> {
        let params = artifact.params();
        let feed_index = artifact.feed_index();
        params
            .universe
            .iter()
            .map(|symbol| {
                let bars = self
                    .market
                    .fetch_bars(symbol, params.start, params.end, params.interval)?;
                let mut supplied = BTreeMap::new();
                for name in feed_index.names() {
                    if let Some(points) =
                        self.market
                            .fetch_column(symbol, name, params.start, params.end, params.interval)?
                    {
                        supplied.insert(name.to_string(), points);
                    }
                }
                debug!(%symbol, bars = bars.len(), supplied = supplied.len(), "loaded bars");
                InstrumentFeed::assemble(symbol, params.start, params.end, bars, &supplied, feed_index)
            })
            .collect()
    }

    fn load_benchmarks(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> (Vec<BenchmarkCurve>, Vec<CoverageWarning>) {
        let mut curves = Vec::new();
        let mut unavailable = Vec::new();
        for symbol in dedup_symbols(&self.config.benchmarks) {
            match self.benchmarks.fetch_closes(&symbol, start, end) {
                Ok(points) => curves.push(BenchmarkCurve { symbol, points }),
                Err(err) => unavailable.push(CoverageWarning {
                    symbol,
                    issue: CoverageIssue::Unavailable {
                        reason: err.to_string(),
                    },
                }),
            }
        }
        (curves, unavailable)
    }
}
