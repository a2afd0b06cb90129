//! Run configuration validation.
//!
//! Checks every key a run reads before anything is compiled or fetched:
//!
//! ```ini
//! [backtest]
//! initial_cash = 100000
//! timeout_secs = 300        ; optional, default 300
//! risk_free_rate = 0.0      ; optional, annual, default 0
//! benchmarks = VOO,SPY      ; optional
//!
//! [data]
//! dir = ./data
//! ```

use crate::domain::compiler::is_valid_symbol;
use crate::domain::error::StratrunError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub fn validate_run_config(config: &dyn ConfigPort) -> Result<(), StratrunError> {
    validate_initial_cash(config)?;
    validate_timeout(config)?;
    validate_risk_free_rate(config)?;
    validate_benchmarks(config)?;
    validate_data_dir(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StratrunError {
    StratrunError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Optional float key. Present but unparsable is an error, unlike
/// `ConfigPort::get_double` which falls back to its default.
pub fn optional_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, StratrunError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("`{}` is not a number", raw.trim()))),
    }
}

fn validate_initial_cash(config: &dyn ConfigPort) -> Result<(), StratrunError> {
    match optional_f64(config, "backtest", "initial_cash")? {
        None => Err(StratrunError::ConfigMissing {
            section: "backtest".to_string(),
            key: "initial_cash".to_string(),
        }),
        Some(v) if v.is_finite() && v > 0.0 => Ok(()),
        Some(_) => Err(invalid(
            "backtest",
            "initial_cash",
            "initial_cash must be positive",
        )),
    }
}

/// Timeout in whole seconds; `None` when the key is absent.
pub fn timeout_secs(config: &dyn ConfigPort) -> Result<Option<u64>, StratrunError> {
    match config.get_string("backtest", "timeout_secs") {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Some(secs)),
            _ => Err(invalid(
                "backtest",
                "timeout_secs",
                "timeout_secs must be a positive whole number",
            )),
        },
    }
}

fn validate_timeout(config: &dyn ConfigPort) -> Result<(), StratrunError> {
    timeout_secs(config).map(|_| ())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), StratrunError> {
    match optional_f64(config, "backtest", "risk_free_rate")? {
        Some(v) if !(0.0..1.0).contains(&v) => Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        )),
        _ => Ok(()),
    }
}

/// Comma-separated benchmark symbols; empty entries are ignored.
pub fn benchmark_symbols(config: &dyn ConfigPort) -> Vec<String> {
    config
        .get_string("backtest", "benchmarks")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn validate_benchmarks(config: &dyn ConfigPort) -> Result<(), StratrunError> {
    match benchmark_symbols(config)
        .into_iter()
        .find(|s| !is_valid_symbol(s))
    {
        Some(bad) => Err(invalid(
            "backtest",
            "benchmarks",
            format!("invalid benchmark symbol `{}`", bad),
        )),
        None => Ok(()),
    }
}

fn validate_data_dir(config: &dyn ConfigPort) -> Result<(), StratrunError> {
    match config.get_string("data", "dir") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(StratrunError::ConfigMissing {
            section: "data".to_string(),
            key: "dir".to_string(),
        }),
    }
}
