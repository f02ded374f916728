//! Wire protocol
//!
//! Line-oriented UTF-8 text over TCP. Each client line is a command token
//! optionally followed by an argument string; each server message is a
//! token optionally followed by a compact JSON payload:
//!
//! ```text
//! → smartctl /dev/sda
//! ← smartctl {"disk":"/dev/sda","status":"old","updated":true,...}
//! ```
//!
//! The line terminator (`\n` or `\r\n`) is detected from the first line a
//! client sends and used for every message sent back on that connection.

use serde::Serialize;
use tracing::{debug, warn};

use super::clients::ConnectionId;
use crate::error::Result;

/// Longest accepted line, terminator excluded
pub const MAX_LINE_LENGTH: usize = 16384;

/// Response tokens
pub mod token {
    pub const PONG: &str = "pong";
    pub const GET_DISKS: &str = "get_disks";
    pub const GET_DISKS_WIN: &str = "get_disks_win";
    pub const SMARTCTL: &str = "smartctl";
    pub const ERROR: &str = "error";
    pub const MANUAL_FIX: &str = "error_that_can_be_manually_fixed";
}

// =============================================================================
// Delimiter
// =============================================================================

/// Line terminator convention of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Newline,
    CarriageReturnNewline,
}

impl Delimiter {
    /// Detect from a line with its `\n` already removed.
    pub fn detect(line: &[u8]) -> Self {
        if line.last() == Some(&b'\r') {
            Delimiter::CarriageReturnNewline
        } else {
            Delimiter::Newline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Delimiter::Newline => "\n",
            Delimiter::CarriageReturnNewline => "\r\n",
        }
    }
}

impl std::fmt::Display for Delimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delimiter::Newline => write!(f, "\\n"),
            Delimiter::CarriageReturnNewline => write!(f, "\\r\\n"),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    GetDisks,
    GetDisksWin,
    Smartctl { device: String },
    Unknown { name: String },
}

impl Command {
    /// Build from a lower-cased command token and its raw argument string.
    pub fn parse(name: &str, args: &str) -> Self {
        match name {
            "ping" => Command::Ping,
            "get_disks" => Command::GetDisks,
            "get_disks_win" => Command::GetDisksWin,
            "smartctl" => Command::Smartctl {
                device: args.to_string(),
            },
            other => Command::Unknown {
                name: other.to_string(),
            },
        }
    }

    /// Token the command was invoked with
    pub fn name(&self) -> &str {
        match self {
            Command::Ping => "ping",
            Command::GetDisks => token::GET_DISKS,
            Command::GetDisksWin => token::GET_DISKS_WIN,
            Command::Smartctl { .. } => token::SMARTCTL,
            Command::Unknown { name } => name,
        }
    }

    /// Whether the command runs external tools or inventory calls and thus
    /// needs a worker permit. Cheap commands never queue behind slow ones.
    pub fn needs_worker(&self) -> bool {
        matches!(
            self,
            Command::GetDisks | Command::GetDisksWin | Command::Smartctl { .. }
        )
    }
}

/// What to do with one received line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Close the connection without a reply
    Exit,
    /// Run a command
    Dispatch(Command),
    /// Drop the line
    Skip,
}

/// Split a trimmed line into a lower-cased command token and the rest.
pub fn split_command(line: &str) -> (String, String) {
    match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_lowercase(), rest.trim_start().to_string()),
        None => (line.to_lowercase(), String::new()),
    }
}

/// Per-connection line handling: decoding, delimiter detection, parsing.
#[derive(Debug, Default)]
pub struct LineDecoder {
    delimiter: Option<Delimiter>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed after the first line that decodes as UTF-8; never changes after.
    pub fn delimiter(&self) -> Option<Delimiter> {
        self.delimiter
    }

    /// Handle one raw line, `\n` excluded.
    pub fn decode(&mut self, conn: ConnectionId, raw: &[u8]) -> LineAction {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(conn = %conn, error = %e, "Dropping line that is not valid UTF-8");
                return LineAction::Skip;
            }
        };

        if self.delimiter.is_none() {
            let delimiter = Delimiter::detect(raw);
            debug!(conn = %conn, %delimiter, "Client delimiter detected");
            self.delimiter = Some(delimiter);
        }

        let line = line.trim();
        if line.starts_with("exit") {
            return LineAction::Exit;
        }

        let (name, args) = split_command(line);
        LineAction::Dispatch(Command::parse(&name, &args))
    }
}

// =============================================================================
// Responses
// =============================================================================

/// One server → client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    token: String,
    payload: Option<String>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    message: &'a str,
    command: &'a str,
}

impl Response {
    /// A message with no payload, e.g. `pong`
    pub fn bare(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            payload: None,
        }
    }

    /// A message with a JSON payload
    pub fn with_payload<T: Serialize + ?Sized>(token: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            token: token.into(),
            payload: Some(serde_json::to_string(payload)?),
        })
    }

    /// `error {"message":...,"command":...}`
    pub fn error(message: &str, command: &str) -> Self {
        Self {
            token: token::ERROR.to_string(),
            payload: serde_json::to_string(&ErrorPayload { message, command }).ok(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Render with the connection's delimiter
    pub fn encode(&self, delimiter: Delimiter) -> String {
        match &self.payload {
            Some(payload) => format!("{} {}{}", self.token, payload, delimiter.as_str()),
            None => format!("{}{}", self.token, delimiter.as_str()),
        }
    }
}
