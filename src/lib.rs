//! Pesto - remote disk diagnostics
//!
//! A small TCP command server that lets a remote client enumerate the
//! block devices of the host, run `smartctl` on them and record the result
//! in the Tarallo inventory, plus an offline tool to label saved reports.
//!
//! # Architecture
//!
//! ```text
//!   TCP clients ─▶ server (listener, executor, client registry)
//!                        │
//!                        ▼
//!                  disks (registry, identity) ─▶ inventory
//!                        │
//!                        ▼
//!                  adapters (lsblk, smartctl, wmic, tarallo)
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Host tool and inventory adapters implementing domain ports
//! - [`classify`] - Offline labeling of saved smartctl reports
//! - [`config`] - Layered configuration
//! - [`disks`] - Disk registry and identity resolution
//! - [`domain`] - Ports and value objects
//! - [`error`] - Error types
//! - [`server`] - Line protocol, command execution, connections
//! - [`testing`] - In-memory fakes of every port

pub mod adapters;
pub mod classify;
pub mod config;
pub mod disks;
pub mod domain;
pub mod error;
pub mod server;
pub mod testing;

// Re-export commonly used types
pub use config::Config;
pub use disks::{DiskRecord, DiskRegistry, IdentityResolver};
pub use error::{Error, Result};
pub use server::{Server, Services};
