//! stratrun: strategy compiler, safety validator and deterministic backtester.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`]. [`orchestrator`] sequences one run
//! end to end; [`cli`] wires the adapters together.

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod orchestrator;
pub mod cli;
