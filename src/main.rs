//! Pesto
//!
//! Remote disk diagnostics command server.
//!
//! ```text
//! ┌──────────┐   lines    ┌──────────────────────────────────────────┐
//! │  client  │──────────▶│ listener ─▶ executor ─▶ lsblk / smartctl  │
//! │          │◀──────────│ connection ◀─ queue      └─▶ Tarallo      │
//! └──────────┘ responses  └──────────────────────────────────────────┘
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pesto::adapters::{Lsblk, Smartctl, TaralloClient, Wmic};
use pesto::disks::{scan_for_disks, DiskRegistry, IdentityResolver};
use pesto::domain::ports::Inventory;
use pesto::{Config, Server, Services};

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> pesto::Result<()> {
    info!("Starting Pesto");
    for source in &config.sources {
        info!("  Configuration file: {}", source.display());
    }
    info!("  Max concurrent commands: {}", config.max_commands);
    info!("  smartctl timeout: {}s", config.smartctl_timeout.as_secs());

    let inventory: Option<Arc<dyn Inventory>> = match config.inventory.clone() {
        Some(inventory) => {
            info!("  Inventory: {}", inventory.base_url);
            let client: Arc<dyn Inventory> = Arc::new(TaralloClient::new(inventory)?);
            Some(client)
        }
        None => {
            warn!("TARALLO_URL or TARALLO_TOKEN not set, inventory integration disabled");
            None
        }
    };

    let disks = Arc::new(DiskRegistry::new(
        Arc::new(Lsblk::new()),
        IdentityResolver::new(inventory),
    ));
    let found = scan_for_disks(&disks).await;
    info!("Startup scan found {} disks", found);

    let services = Services {
        disks,
        diagnostics: Arc::new(Smartctl::new(config.smartctl_timeout)),
        logical_disks: Arc::new(Wmic::new()),
    };

    let server = Server::bind(&config.bind_addr(), services, config.max_commands).await?;
    spawn_signal_handlers(server.shutdown_token());

    server.run().await?;
    info!("Pesto shutdown complete");
    Ok(())
}

// =============================================================================
// Signals
// =============================================================================

fn spawn_signal_handlers(shutdown: CancellationToken) {
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            ctrl_c.cancel();
        }
    });

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM, shutting down");
                shutdown.cancel();
            }
        });
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(config: &Config) {
    let level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" | "critical" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
