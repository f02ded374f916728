//! Command Executor
//!
//! Every dispatched line runs as its own task, so a slow `smartctl` never
//! holds up other commands on the same or other connections. Commands that
//! run external tools or talk to the inventory first take a permit from a
//! bounded worker pool; beyond the ceiling they queue.
//!
//! Exactly one response is produced per command, even when the command
//! fails or panics. Manually-fixable identity notices are delivered before
//! it. Responses may arrive out of submission order.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use super::clients::{ClientRegistry, ConnectionId};
use super::protocol::{token, Command, Response};
use crate::disks::{DiskRegistry, ManualFix};
use crate::domain::ports::{DiagnosticTool, LogicalDiskField, LogicalDiskLister};
use crate::error::{Error, Result};

/// Status sent to the inventory after a successful diagnostic run.
///
/// Real scoring of the report is not implemented: every readable disk is
/// reported as `old`.
pub fn smartctl_status(_output: &str) -> &'static str {
    "old"
}

/// Payload of a `smartctl` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmartctlReport {
    pub disk: String,
    pub status: Option<&'static str>,
    pub updated: bool,
    pub exitcode: i32,
    pub output: String,
    pub stderr: String,
}

/// Host-side collaborators the executor needs
#[derive(Clone)]
pub struct Services {
    pub disks: Arc<DiskRegistry>,
    pub diagnostics: Arc<dyn DiagnosticTool>,
    pub logical_disks: Arc<dyn LogicalDiskLister>,
}

/// Runs commands and hands their responses to the client registry
pub struct CommandExecutor {
    services: Services,
    clients: Arc<ClientRegistry>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl CommandExecutor {
    pub fn new(services: Services, clients: Arc<ClientRegistry>, max_concurrent: usize) -> Self {
        Self {
            services,
            clients,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Tracker of every outstanding command task
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Number of worker permits currently free
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Run `command` for connection `conn` on its own task.
    pub fn dispatch(self: &Arc<Self>, conn: ConnectionId, command: Command) {
        let executor = Arc::clone(self);
        self.tracker.spawn(async move {
            let name = command.name().to_string();
            debug!(conn = %conn, command = %name, "Received command");

            // Inner task so a panic is caught here and still answered
            let worker = Arc::clone(&executor);
            let outcome = tokio::spawn(async move { worker.execute(command).await }).await;

            let responses = match outcome {
                Ok(Ok(responses)) => responses,
                Ok(Err(e)) => {
                    error!(conn = %conn, command = %name, error = %e, "Command failed");
                    vec![Response::error(&e.to_string(), &name)]
                }
                Err(join_error) => {
                    error!(conn = %conn, command = %name, error = %join_error, "Command task crashed");
                    vec![Response::error("Internal error", &name)]
                }
            };

            for response in responses {
                executor.clients.deliver(conn, response);
            }
        });
    }

    /// Run a command to completion. The last response is the command's own
    /// reply; any before it are notices.
    pub async fn execute(&self, command: Command) -> Result<Vec<Response>> {
        let _permit = if command.needs_worker() {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(format!("Worker pool closed: {}", e)))?;
            Some(permit)
        } else {
            None
        };

        match command {
            Command::Ping => Ok(vec![Response::bare(token::PONG)]),
            Command::GetDisks => self.get_disks().await,
            Command::GetDisksWin => self.get_disks_win().await,
            Command::Smartctl { device } => self.smartctl(&device).await,
            Command::Unknown { name } => Ok(vec![Response::error("Unrecognized command", &name)]),
        }
    }

    async fn get_disks(&self) -> Result<Vec<Response>> {
        let report = self.services.disks.refresh_all().await;

        let mut responses = manual_fixes(report.notices)?;
        responses.push(Response::with_payload(token::GET_DISKS, &report.disks)?);
        Ok(responses)
    }

    async fn get_disks_win(&self) -> Result<Vec<Response>> {
        let lister = &self.services.logical_disks;
        let captions = lister.list(LogicalDiskField::Caption).await?;
        let sizes = lister.list(LogicalDiskField::Size).await?;

        // The two listings share no key, only their order
        if captions.len() != sizes.len() {
            warn!(
                captions = captions.len(),
                sizes = sizes.len(),
                "Logical disk listings disagree"
            );
            let message = format!(
                "Logical disk listings disagree: {} captions, {} sizes",
                captions.len(),
                sizes.len()
            );
            return Ok(vec![Response::error(&message, token::GET_DISKS_WIN)]);
        }

        let drives: Vec<[String; 2]> = captions
            .into_iter()
            .zip(sizes)
            .map(|(caption, size)| [caption, size])
            .collect();
        Ok(vec![Response::with_payload(token::GET_DISKS_WIN, &drives)?])
    }

    async fn smartctl(&self, device: &str) -> Result<Vec<Response>> {
        let device = device.trim();
        if device.is_empty() || device.starts_with('-') {
            return Ok(vec![Response::error("Invalid device path", token::SMARTCTL)]);
        }

        let (exitcode, output, stderr) = match self.services.diagnostics.run(device).await {
            Ok(run) => (run.exit_code, run.stdout, run.stderr),
            Err(e @ Error::ToolTimeout { .. }) => {
                warn!(disk = device, error = %e, "Diagnostic tool killed");
                (-1, String::new(), e.to_string())
            }
            Err(e) => return Err(e),
        };

        let mut responses = Vec::new();
        let mut status = None;
        let mut updated = false;

        if exitcode == 0 {
            let disk_status = smartctl_status(&output);
            status = Some(disk_status);

            // A readable device the startup scan missed is tracked from now on
            if self.services.disks.track(device) {
                debug!(disk = device, "Tracking disk first seen by smartctl");
            }
            if let Some(outcome) = self.services.disks.refresh(device).await {
                responses.extend(manual_fixes(outcome.notice)?);

                if let Some(code) = outcome.record.and_then(|record| record.code) {
                    match self.services.disks.resolver().push_status(&code, disk_status).await {
                        Ok(pushed) => updated = pushed,
                        Err(e) => {
                            warn!(disk = device, code = %code, error = %e, "Cannot update status on inventory")
                        }
                    }
                }
            }
        }

        let report = SmartctlReport {
            disk: device.to_string(),
            status,
            updated,
            exitcode,
            output,
            stderr,
        };
        responses.push(Response::with_payload(token::SMARTCTL, &report)?);
        Ok(responses)
    }
}

fn manual_fixes(notices: impl IntoIterator<Item = ManualFix>) -> Result<Vec<Response>> {
    notices
        .into_iter()
        .map(|notice| {
            warn!(disk = %notice.disk, "{}", notice.message);
            Response::with_payload(token::MANUAL_FIX, &notice)
        })
        .collect()
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("idle_workers", &self.idle_workers())
            .field("outstanding", &self.tracker.len())
            .finish()
    }
}
