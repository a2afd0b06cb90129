//! Report output port trait.

use crate::domain::error::StratrunError;
use crate::orchestrator::RunResult;
use std::path::Path;

/// Port for writing run results.
pub trait ReportPort {
    fn write(&self, result: &RunResult, output_path: &Path) -> Result<(), StratrunError>;
}
