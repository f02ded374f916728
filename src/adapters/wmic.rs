//! wmic Adapter
//!
//! Implements the `LogicalDiskLister` port for Windows hosts.

use std::time::Duration;

use async_trait::async_trait;

use super::process::run_captured;
use crate::domain::ports::{LogicalDiskField, LogicalDiskLister};
use crate::error::{Error, Result};

const WMIC_TIMEOUT: Duration = Duration::from_secs(30);

/// Logical disk lister backed by `wmic logicaldisk get <column>`.
#[derive(Debug, Clone, Default)]
pub struct Wmic;

impl Wmic {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LogicalDiskLister for Wmic {
    async fn list(&self, field: LogicalDiskField) -> Result<Vec<String>> {
        let column = field.column().to_lowercase();
        let output = run_captured("wmic", &["logicaldisk", "get", &column], WMIC_TIMEOUT).await?;
        if !output.success() {
            return Err(Error::ToolFailed {
                command: format!("wmic logicaldisk get {}", column),
                reason: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            });
        }
        Ok(parse_column(&output.stdout, field))
    }
}

/// Drop the header line and blank lines, keep one trimmed value per disk.
pub fn parse_column(stdout: &str, field: LogicalDiskField) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != field.column())
        .map(str::to_string)
        .collect()
}
