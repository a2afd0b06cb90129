//! End-to-end pipeline tests: document → compile → validate → simulate →
//! measure, driven through the orchestrator with in-memory market data.

mod common;

use approx::assert_relative_eq;
use common::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use stratrun::domain::compiler::{CompiledArtifact, compile};
use stratrun::domain::document::StrategyDocument;
use stratrun::domain::execution::Side;
use stratrun::domain::metrics::{CoverageIssue, PricePoint};
use stratrun::domain::program::ExitKind;
use stratrun::domain::validator::validate;
use stratrun::orchestrator::{Orchestrator, RunConfig, RunResult, RunStatus};

const SMA_2_POSITIVE: &str = r#"{"type": "indicator", "ind": "SMA", "period": 2, "op": ">", "rhs": 0}"#;
const QUARTER_CASH: &str = r#"{"sizing": "percent_cash", "value": 0.25}"#;

fn run(data: &MockMarketData, document: &StrategyDocument) -> RunResult {
    Orchestrator::new(data, data, RunConfig::default()).run(document)
}

fn run_with(data: &MockMarketData, document: &StrategyDocument, config: RunConfig) -> RunResult {
    Orchestrator::new(data, data, config).run(document)
}

mod entry_and_exit {
    use super::*;

    #[test]
    fn entry_requires_every_condition() {
        let doc = strategy(
            &["AAPL"],
            r#"{"type": "indicator", "ind": "SMA", "period": 50, "op": ">", "rhs": {"ind": "SMA", "period": 200}},
               {"type": "indicator", "ind": "RSI", "period": 14, "op": "<", "rhs": 70}"#,
            r#"{"type": "stop_loss", "percent": 0.05}"#,
            QUARTER_CASH,
        );
        let data = MockMarketData::new()
            .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &[100.0, 100.0, 100.0]))
            .with_column("AAPL", "sma_50", &[Some(110.0); 3])
            .with_column("AAPL", "sma_200", &[Some(100.0); 3])
            .with_column("AAPL", "rsi_14", &[Some(75.0), Some(75.0), Some(65.0)]);

        let result = run(&data, &doc);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.fills.len(), 1);
        let fill = &result.fills[0];
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.timestamp, midnight(date("2024-01-03")));
    }

    #[test]
    fn first_listed_exit_wins() {
        let doc = strategy(
            &["AAPL"],
            SMA_2_POSITIVE,
            r#"{"type": "trailing_stop", "percent": 0.08},
               {"type": "take_profit", "percent": 0.15}"#,
            QUARTER_CASH,
        );
        let mut bars = daily_bars("AAPL", "2024-01-01", &[100.0, 100.0]);
        bars.push(make_bar("AAPL", midnight(date("2024-01-03")), 118.0, 130.0));
        let data = MockMarketData::new().with_bars("AAPL", bars);

        let result = run(&data, &doc);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.fills.len(), 2);
        let exit = &result.fills[1];
        assert_eq!(exit.side, Side::Sell);
        assert_eq!(exit.reason, Some(ExitKind::TrailingStop));
        assert_relative_eq!(exit.price, 118.0);
    }

    #[test]
    fn percent_cash_sizing_floors_to_whole_shares() {
        let doc = strategy(
            &["AAPL"],
            SMA_2_POSITIVE,
            r#"{"type": "stop_loss", "percent": 0.5}"#,
            QUARTER_CASH,
        );
        let data = MockMarketData::new()
            .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &[50.0, 50.0, 50.0]));

        let result = run(&data, &doc);
        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].quantity, 500);
        assert_relative_eq!(result.final_equity.unwrap(), 100_000.0);
    }

    #[test]
    fn max_positions_caps_concurrent_holdings() {
        let doc = strategy(
            &["AAPL", "MSFT", "NVDA"],
            SMA_2_POSITIVE,
            r#"{"type": "stop_loss", "percent": 0.5}"#,
            r#"{"sizing": "percent_cash", "value": 0.1, "max_positions": 2}"#,
        );
        let closes = [20.0, 21.0, 22.0, 23.0];
        let data = MockMarketData::new()
            .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &closes))
            .with_bars("MSFT", daily_bars("MSFT", "2024-01-01", &closes))
            .with_bars("NVDA", daily_bars("NVDA", "2024-01-01", &closes));

        let result = run(&data, &doc);
        let bought: Vec<&str> = result
            .fills
            .iter()
            .filter(|f| f.side == Side::Buy)
            .map(|f| f.symbol.as_str())
            .collect();
        assert_eq!(bought, vec!["AAPL", "MSFT"]);
    }
}

mod safety {
    use super::*;

    fn tampered(doc: &StrategyDocument) -> CompiledArtifact {
        let artifact = compile(doc).unwrap();
        CompiledArtifact::new(
            format!("{}exit open(0.1)\n", artifact.source()),
            artifact.program().clone(),
            artifact.feed_index().clone(),
            artifact.params().clone(),
        )
    }

    #[test]
    fn compiled_programs_pass_validation() {
        let doc = strategy(
            &["AAPL"],
            r#"{"type": "indicator", "ind": "MACD", "field": "signal", "op": "<", "rhs": {"ind": "MACD"}},
               {"type": "indicator", "ind": "BBANDS", "period": 20, "field": "lower", "op": ">=", "rhs": 10.5}"#,
            r#"{"type": "profit_target", "percent": 0.2}"#,
            QUARTER_CASH,
        );
        assert!(validate(&compile(&doc).unwrap()).is_pass());
    }

    #[test]
    fn rejected_program_never_touches_data() {
        let doc = strategy(
            &["AAPL"],
            SMA_2_POSITIVE,
            r#"{"type": "stop_loss", "percent": 0.05}"#,
            QUARTER_CASH,
        );
        let data = MockMarketData::new()
            .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &[100.0, 101.0, 102.0]));

        let result = Orchestrator::new(&data, &data, RunConfig::default()).run_artifact(&tampered(&doc));
        assert_eq!(result.status, RunStatus::Rejected);
        assert_eq!(result.exit_code(), 5);
        assert!(result.violations.iter().any(|v| v.token == "open"));
        assert!(result.equity_curve.is_empty());
        assert!(result.metrics.is_none());
        assert_eq!(data.fetch_count(), 0);
    }
}

mod failures {
    use super::*;

    fn doc(universe: &[&str]) -> StrategyDocument {
        strategy(
            universe,
            SMA_2_POSITIVE,
            r#"{"type": "stop_loss", "percent": 0.05}"#,
            QUARTER_CASH,
        )
    }

    fn data() -> MockMarketData {
        MockMarketData::new()
            .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &[100.0, 101.0, 102.0]))
    }

    #[test]
    fn missing_symbol_is_data_gap() {
        let result = run(&data(), &doc(&["AAPL", "NOPE"]));
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.exit_code(), 3);
        assert!(result.error.unwrap().message.contains("NOPE"));
        assert!(result.fills.is_empty());
        assert!(result.metrics.is_none());
    }

    #[test]
    fn hole_in_one_instrument_is_data_gap() {
        let mut msft = daily_bars("MSFT", "2024-01-01", &[50.0, 51.0, 52.0]);
        msft.remove(1);
        let data = data().with_bars("MSFT", msft);

        let result = run(&data, &doc(&["AAPL", "MSFT"]));
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.exit_code(), 3);
        let message = result.error.unwrap().message;
        assert!(message.contains("MSFT"));
        assert!(message.contains("2024-01-02"));
        assert!(result.equity_curve.is_empty());
    }

    #[test]
    fn bars_outside_timeframe_are_data_gap() {
        let mut bars = daily_bars("AAPL", "2024-01-01", &[100.0, 101.0, 102.0]);
        bars.push(make_bar("AAPL", midnight(date("2025-01-02")), 103.0, 103.0));
        let mut data = MockMarketData::new().with_bars("AAPL", bars);
        data.clip_to_range = false;

        let result = run(&data, &doc(&["AAPL"]));
        assert_eq!(result.exit_code(), 3);
        assert!(result.error.unwrap().message.contains("outside"));
    }

    #[test]
    fn fetch_failure_is_data_gap() {
        let data = data().with_error("AAPL", "connection refused");
        let result = run(&data, &doc(&["AAPL"]));
        assert_eq!(result.exit_code(), 3);
        assert!(result.error.unwrap().message.contains("connection refused"));
    }

    #[test]
    fn unsupported_indicator_fails_compilation() {
        let doc = strategy(
            &["AAPL"],
            r#"{"type": "indicator", "ind": "VWAP", "op": ">", "rhs": 1}"#,
            r#"{"type": "stop_loss", "percent": 0.05}"#,
            QUARTER_CASH,
        );
        let data = data();
        let result = run(&data, &doc);
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.exit_code(), 4);
        assert!(result.program.is_none());
        assert_eq!(data.fetch_count(), 0);
    }

    #[test]
    fn zero_budget_times_out() {
        let config = RunConfig {
            timeout: Some(Duration::ZERO),
            ..RunConfig::default()
        };
        let result = run_with(&data(), &doc(&["AAPL"]), config);
        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(result.exit_code(), 6);
        assert!(result.equity_curve.is_empty());
        assert!(result.fills.is_empty());
        assert!(result.final_equity.is_none());
    }

    #[test]
    fn cancel_flag_times_out() {
        let data = data();
        let flag = Arc::new(AtomicBool::new(true));
        let result = Orchestrator::new(&data, &data, RunConfig::default())
            .with_cancel_flag(flag)
            .run(&doc(&["AAPL"]));
        assert_eq!(result.status, RunStatus::Timeout);
        assert!(result.metrics.is_none());
    }
}

mod metrics {
    use super::*;

    #[test]
    fn rising_curve_has_no_drawdown_or_sortino() {
        let doc = strategy(
            &["AAPL"],
            SMA_2_POSITIVE,
            r#"{"type": "stop_loss", "percent": 0.5}"#,
            QUARTER_CASH,
        );
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let data = MockMarketData::new()
            .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &closes));

        let result = run(&data, &doc);
        let metrics = result.metrics.unwrap();
        assert!(metrics.total_return > 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert!(metrics.sortino.is_none());
        assert!(metrics.calmar.is_none());
        assert!(metrics.sharpe.unwrap() > 0.0);
    }

    #[test]
    fn excess_return_over_voo() {
        let doc = document(
            r#"{
                "name": "SMA Cross with RSI Filter",
                "universe": ["AAPL"],
                "timeframe": {"start": "2019-01-01", "end": "2024-12-31", "interval": "1d"},
                "entry": [
                    {"type": "indicator", "ind": "SMA", "period": 10, "op": ">", "rhs": {"ind": "SMA", "period": 30}},
                    {"type": "indicator", "ind": "RSI", "period": 14, "op": "<", "rhs": 70}
                ],
                "exit": [{"type": "trailing_stop", "percent": 0.08}],
                "position": {"sizing": "percent_cash", "value": 0.25},
                "costs": {"commission_per_share": 0.01, "slippage_bps": 5}
            }"#,
        );
        let timeline = weekdays("2019-01-01", "2024-12-31");
        let bars: Vec<OhlcvBar> = timeline
            .iter()
            .enumerate()
            .map(|(i, ts)| {
                let t = i as f64;
                let close = 100.0 * (1.0 + 0.0004 * t) + 6.0 * (t / 15.0).sin();
                make_bar("AAPL", *ts, close, close * 1.01)
            })
            .collect();
        let voo: Vec<PricePoint> = timeline
            .iter()
            .enumerate()
            .map(|(i, ts)| PricePoint {
                timestamp: *ts,
                price: 250.0 + 0.1 * i as f64,
            })
            .collect();
        let data = MockMarketData::new()
            .with_bars("AAPL", bars)
            .with_benchmark("VOO", voo);
        let config = RunConfig {
            benchmarks: vec!["VOO".to_string()],
            ..RunConfig::default()
        };

        let result = run_with(&data, &doc, config);
        assert_eq!(result.status, RunStatus::Completed);
        assert!(!result.fills.is_empty());
        let metrics = result.metrics.unwrap();
        let bench = &metrics.benchmarks[0];
        assert_eq!(bench.symbol, "VOO");
        assert_eq!(bench.aligned_points, timeline.len());
        let expected = metrics.total_return - bench.total_return.unwrap();
        let excess = metrics.excess_returns["VOO"].unwrap();
        assert_relative_eq!(excess, expected, epsilon = 1e-4);
        assert!(metrics.warnings.is_empty());
    }

    #[test]
    fn unavailable_benchmark_is_a_warning() {
        let doc = strategy(
            &["AAPL"],
            SMA_2_POSITIVE,
            r#"{"type": "stop_loss", "percent": 0.5}"#,
            QUARTER_CASH,
        );
        let data = MockMarketData::new()
            .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &[10.0, 11.0, 12.0]));
        let config = RunConfig {
            benchmarks: vec!["SPY".to_string()],
            ..RunConfig::default()
        };

        let result = run_with(&data, &doc, config);
        assert_eq!(result.status, RunStatus::Completed);
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.excess_returns["SPY"], None);
        assert!(matches!(
            metrics.warnings[0].issue,
            CoverageIssue::Unavailable { .. }
        ));
    }
}

mod documents {
    use super::*;

    #[test]
    fn round_trip_keeps_optional_fields_absent() {
        let input = r#"{
            "name": "Round Trip",
            "universe": ["AAPL"],
            "timeframe": {"start": "2020-01-01", "end": "2020-12-31"},
            "entry": [{"type": "indicator", "ind": "KAMA", "period": 10, "op": ">", "rhs": 1}],
            "exit": [{"type": "profit_target", "percent": 0.3}, {"type": "chandelier", "percent": 0.1}],
            "position": {"sizing": "fixed", "value": 10},
            "costs": {"commission_per_share": 0}
        }"#;
        let doc = document(input);
        let json = doc.to_json_pretty().unwrap();
        assert!(!json.contains("interval"));
        assert!(!json.contains("slippage_bps"));
        assert!(!json.contains("max_positions"));
        assert!(json.contains("KAMA"));
        assert!(json.contains("chandelier"));
        assert_eq!(StrategyDocument::from_json(&json).unwrap(), doc);
    }

    #[test]
    fn compilation_is_pure() {
        let doc = strategy(
            &["AAPL", "MSFT"],
            r#"{"type": "indicator", "ind": "EMA", "period": 12, "op": ">", "rhs": {"ind": "SMA", "period": 26}},
               {"type": "indicator", "ind": "RSI", "op": "<=", "rhs": 55}"#,
            r#"{"type": "trailing_stop", "percent": 0.1}, {"type": "stop_loss", "percent": 0.05}"#,
            QUARTER_CASH,
        );
        let first = compile(&doc).unwrap();
        let second = compile(&doc).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.source(), second.source());
    }
}

mod determinism {
    use super::*;

    fn doc() -> StrategyDocument {
        strategy(
            &["AAPL", "MSFT"],
            r#"{"type": "indicator", "ind": "SMA", "period": 3, "op": ">", "rhs": {"ind": "SMA", "period": 5}}"#,
            r#"{"type": "trailing_stop", "percent": 0.06}, {"type": "stop_loss", "percent": 0.04}"#,
            r#"{"sizing": "percent_cash", "value": 0.4, "max_positions": 1}"#,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn identical_inputs_give_identical_results(
            closes in prop::collection::vec(20.0f64..200.0, 8..60),
        ) {
            let reversed: Vec<f64> = closes.iter().rev().copied().collect();
            let data = MockMarketData::new()
                .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &closes))
                .with_bars("MSFT", daily_bars("MSFT", "2024-01-01", &reversed));
            let doc = doc();

            let first = serde_json::to_string(&run(&data, &doc)).unwrap();
            let second = serde_json::to_string(&run(&data, &doc)).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn cash_never_goes_negative(
            closes in prop::collection::vec(20.0f64..200.0, 8..60),
        ) {
            let data = MockMarketData::new()
                .with_bars("AAPL", daily_bars("AAPL", "2024-01-01", &closes))
                .with_bars("MSFT", daily_bars("MSFT", "2024-01-01", &closes));

            let result = run(&data, &doc());
            prop_assert_eq!(result.status, RunStatus::Completed);
            prop_assert_eq!(result.equity_curve.len(), closes.len());
            for fill in &result.fills {
                prop_assert!(fill.quantity > 0);
            }
            for point in &result.equity_curve {
                prop_assert!(point.equity > 0.0);
            }
        }
    }
}
