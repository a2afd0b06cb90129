//! JSON report adapter implementing ReportPort.

use std::fs;
use std::path::Path;

use crate::domain::error::StratrunError;
use crate::orchestrator::RunResult;
use crate::ports::report_port::ReportPort;

pub struct JsonReportAdapter {
    pretty: bool,
}

impl JsonReportAdapter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn render(&self, result: &RunResult) -> Result<String, StratrunError> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(result)
        } else {
            serde_json::to_string(result)
        };
        rendered.map_err(|e| StratrunError::Io(std::io::Error::other(e)))
    }
}

impl Default for JsonReportAdapter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, result: &RunResult, output_path: &Path) -> Result<(), StratrunError> {
        let mut json = self.render(result)?;
        json.push('\n');
        fs::write(output_path, json)?;
        Ok(())
    }
}
