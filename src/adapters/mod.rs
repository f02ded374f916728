//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  DeviceEnumerator │ DiagnosticTool │ LogicalDiskLister │ Inventory│
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │        Lsblk │ Smartctl │ Wmic │ TaralloClient                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod lsblk;
mod process;
mod smartctl;
mod tarallo;
mod wmic;

pub use lsblk::{parse_lsblk, Lsblk};
pub use smartctl::Smartctl;
pub use tarallo::{InventoryConfig, TaralloClient};
pub use wmic::{parse_column, Wmic};
