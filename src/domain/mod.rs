//! Core domain types and logic.

pub mod ohlcv;
pub mod document;
pub mod indicator;
pub mod program;
pub mod compiler;
pub mod validator;
pub mod feed;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod program_eval;
pub mod deadline;
pub mod backtest;
pub mod metrics;
pub mod config_validation;
pub mod error;
