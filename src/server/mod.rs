//! TCP command server.
//!
//! ```text
//!  client ──line──▶ listener ──Command──▶ executor ──▶ disks / tools / inventory
//!    ▲                                       │
//!    └──── connection task ◀── queue ◀── ClientRegistry
//! ```

pub mod clients;
pub mod executor;
mod listener;
pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

pub use clients::{ClientRegistry, ConnectionId};
pub use executor::{smartctl_status, CommandExecutor, Services, SmartctlReport};
pub use protocol::{Command, Delimiter, Response};

use crate::error::{Error, Result};
use listener::{serve_connection, ConnectionContext};

/// Pause after a failed accept, so fd exhaustion does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound, not yet running, command server
pub struct Server {
    listener: TcpListener,
    executor: Arc<CommandExecutor>,
    clients: Arc<ClientRegistry>,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(addr: &str, services: Services, max_commands: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let clients = Arc::new(ClientRegistry::new());
        let executor = Arc::new(CommandExecutor::new(
            services,
            Arc::clone(&clients),
            max_commands,
        ));

        Ok(Self {
            listener,
            executor,
            clients,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancelling this token starts a graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Accept clients until shut down, then let every outstanding command
    /// answer before closing the remaining connections.
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Listening");

        let connections = TaskTracker::new();
        let ctx = Arc::new(ConnectionContext {
            executor: Arc::clone(&self.executor),
            clients: Arc::clone(&self.clients),
            shutdown: self.shutdown.clone(),
            drained: CancellationToken::new(),
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(stream, peer, Arc::clone(&ctx)));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        drop(self.listener);

        let commands = self.executor.tracker();
        info!(outstanding = commands.len(), "Stopped accepting, waiting for commands");
        commands.close();
        commands.wait().await;

        ctx.drained.cancel();
        connections.close();
        connections.wait().await;

        info!("Server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .field("executor", &self.executor)
            .field("clients", &self.clients.len())
            .finish()
    }
}
