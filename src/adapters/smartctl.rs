//! smartctl Adapter
//!
//! Implements the `DiagnosticTool` port with `sudo smartctl -a <device>`.

use std::time::Duration;

use async_trait::async_trait;

use super::process::run_captured;
use crate::domain::ports::{DiagnosticTool, ToolOutput};
use crate::error::Result;

/// Diagnostic tool backed by smartmontools, run with elevated privileges.
#[derive(Debug, Clone)]
pub struct Smartctl {
    timeout: Duration,
}

impl Smartctl {
    /// Create an adapter that kills smartctl after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl DiagnosticTool for Smartctl {
    async fn run(&self, device: &str) -> Result<ToolOutput> {
        run_captured("sudo", &["smartctl", "-a", device], self.timeout).await
    }
}
