//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for the host tools and the
//!   inventory, plus the value objects they exchange

pub mod ports;

pub use ports::{
    DeviceEnumerator, DeviceInfo, DiagnosticTool, Inventory, LogicalDiskField, LogicalDiskLister,
    ToolOutput,
};
