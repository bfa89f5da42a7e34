//! Report generation port trait.

use std::path::Path;

use crate::domain::error::PinelabError;
use crate::domain::result::SimulationResult;

/// Port for writing simulation reports.
pub trait ReportPort {
    fn write(&self, result: &SimulationResult, output_path: &Path) -> Result<(), PinelabError>;
}
