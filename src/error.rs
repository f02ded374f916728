//! Error types for the Pesto disk diagnostics server

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Pesto server and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // =========================================================================
    // Inventory Errors
    // =========================================================================
    /// Inventory connection error
    #[error("Inventory connection error: {0}")]
    InventoryConnection(#[source] reqwest::Error),

    /// Inventory answered with an unexpected status
    #[error("Inventory request {path} failed with status {status}")]
    InventoryStatus { path: String, status: u16 },

    /// Inventory integration is not configured
    #[error("Inventory is not configured")]
    InventoryUnavailable,

    // =========================================================================
    // External Tool Errors
    // =========================================================================
    /// External tool could not be started or returned garbage
    #[error("Command '{command}' failed: {reason}")]
    ToolFailed { command: String, reason: String },

    /// External tool exceeded its deadline and was killed
    #[error("Command '{command}' timed out after {seconds}s")]
    ToolTimeout { command: String, seconds: u64 },

    /// Block device enumeration error
    #[error("Disk enumeration error: {0}")]
    Enumeration(String),

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listening socket could not be bound
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
