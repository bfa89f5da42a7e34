//! JSON report adapter: writes a [`SimulationResult`] with `serde_json`.

use std::fs;
use std::path::Path;

use crate::domain::error::PinelabError;
use crate::domain::result::SimulationResult;
use crate::ports::report_port::ReportPort;

#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, result: &SimulationResult, output_path: &Path) -> Result<(), PinelabError> {
        let json = result.to_json().map_err(|e| PinelabError::Data {
            reason: format!("failed to serialise report: {e}"),
        })?;
        fs::write(output_path, json + "\n")?;
        Ok(())
    }
}
