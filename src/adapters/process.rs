//! Subprocess plumbing shared by the host tool adapters.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::domain::ports::ToolOutput;
use crate::error::{Error, Result};

/// Run `program args...` to completion, capturing both streams.
///
/// The child is killed if `deadline` elapses first: dropping the wait future
/// drops the child, and `kill_on_drop` takes care of the rest.
pub(crate) async fn run_captured(
    program: &str,
    args: &[&str],
    deadline: Duration,
) -> Result<ToolOutput> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!(command = %command_line, "Spawning external tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ToolFailed {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;

    match timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ToolOutput {
            // Killed by a signal: no code to report
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(Error::ToolFailed {
            command: command_line,
            reason: e.to_string(),
        }),
        Err(_) => Err(Error::ToolTimeout {
            command: command_line,
            seconds: deadline.as_secs(),
        }),
    }
}
