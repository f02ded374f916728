//! Server configuration.
//!
//! Values come from, in order of precedence: command line flags, the process
//! environment, key/value files, built-in defaults. Files are read in order
//! (local file, per-user file, system file) and the first one defining a key
//! wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::adapters::InventoryConfig;
use crate::error::{Error, Result};

pub const DEFAULT_IP: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1030;
pub const DEFAULT_LOG_LEVEL: &str = "INFO";
pub const DEFAULT_MAX_COMMANDS: usize = 8;
pub const DEFAULT_SMARTCTL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_INVENTORY_TIMEOUT_SECS: u64 = 30;

const SYSTEM_CONFIG: &str = "/etc/pesto.conf";

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pesto - remote disk diagnostics command server
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Local configuration file, read before the per-user and system ones
    #[arg(long, default_value = ".env")]
    pub config: PathBuf,

    /// Address to listen on
    #[arg(long, env = "IP")]
    pub ip: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOGLEVEL")]
    pub log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Inventory base URL
    #[arg(long, env = "TARALLO_URL")]
    pub tarallo_url: Option<String>,

    /// Inventory API token
    #[arg(long, env = "TARALLO_TOKEN", hide_env_values = true)]
    pub tarallo_token: Option<String>,

    /// Commands running tools or inventory calls at the same time
    #[arg(long, env = "MAX_COMMANDS")]
    pub max_commands: Option<String>,

    /// Seconds before a smartctl run is killed
    #[arg(long, env = "SMARTCTL_TIMEOUT")]
    pub smartctl_timeout: Option<String>,

    /// Seconds before an inventory request is abandoned
    #[arg(long, env = "INVENTORY_TIMEOUT")]
    pub inventory_timeout: Option<String>,
}

// =============================================================================
// Configuration files
// =============================================================================

/// Merged contents of the configuration files
#[derive(Debug, Default, Clone)]
pub struct FileLayers {
    values: HashMap<String, String>,
    loaded: Vec<PathBuf>,
}

impl FileLayers {
    /// Local file, then `~/.conf/WEEE-Open/pesto.conf`, then `/etc/pesto.conf`.
    pub fn default_paths(local: &Path) -> Vec<PathBuf> {
        let mut paths = vec![local.to_path_buf()];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".conf").join("WEEE-Open").join("pesto.conf"));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG));
        paths
    }

    /// Read every existing file in `paths`. Missing files are skipped.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut layers = Self::default();
        for path in paths.iter().filter(|path| path.is_file()) {
            let entries = dotenv::from_path_iter(path)
                .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
            for entry in entries {
                let (key, value) = entry.map_err(|e| {
                    Error::Config(format!("Malformed line in {}: {}", path.display(), e))
                })?;
                layers.values.entry(key).or_insert(value);
            }
            layers.loaded.push(path.clone());
        }
        Ok(layers)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Files that were actually read
    pub fn loaded(&self) -> &[PathBuf] {
        &self.loaded
    }
}

// =============================================================================
// Resolved configuration
// =============================================================================

/// Effective server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub ip: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub max_commands: usize,
    pub smartctl_timeout: Duration,
    /// `None` when the inventory URL or token is missing
    pub inventory: Option<InventoryConfig>,
    /// Configuration files that were read
    pub sources: Vec<PathBuf>,
}

impl Config {
    /// Parse the command line and read the configuration files.
    pub fn load() -> Result<Self> {
        let args = Args::parse();
        let files = FileLayers::load(&FileLayers::default_paths(&args.config))?;
        Self::resolve(&args, &files)
    }

    /// Combine flags/environment (already merged by clap) with file values.
    pub fn resolve(args: &Args, files: &FileLayers) -> Result<Self> {
        let pick = |flag: &Option<String>, key: &str| -> Option<String> {
            flag.clone()
                .or_else(|| files.get(key).map(str::to_string))
                .filter(|value| !value.trim().is_empty())
        };

        let port = parse_or("PORT", pick(&args.port, "PORT"), DEFAULT_PORT)?;
        let max_commands = parse_or(
            "MAX_COMMANDS",
            pick(&args.max_commands, "MAX_COMMANDS"),
            DEFAULT_MAX_COMMANDS,
        )?;
        if max_commands == 0 {
            return Err(Error::Config("MAX_COMMANDS must be at least 1".to_string()));
        }
        let smartctl_timeout = parse_or(
            "SMARTCTL_TIMEOUT",
            pick(&args.smartctl_timeout, "SMARTCTL_TIMEOUT"),
            DEFAULT_SMARTCTL_TIMEOUT_SECS,
        )?;
        let inventory_timeout = parse_or(
            "INVENTORY_TIMEOUT",
            pick(&args.inventory_timeout, "INVENTORY_TIMEOUT"),
            DEFAULT_INVENTORY_TIMEOUT_SECS,
        )?;

        let log_json = args.log_json || files.get("LOG_JSON").is_some_and(is_truthy);

        let inventory = match (
            pick(&args.tarallo_url, "TARALLO_URL"),
            pick(&args.tarallo_token, "TARALLO_TOKEN"),
        ) {
            (Some(base_url), Some(token)) => Some(InventoryConfig {
                base_url,
                token,
                timeout: Duration::from_secs(inventory_timeout),
            }),
            _ => None,
        };

        Ok(Self {
            ip: pick(&args.ip, "IP").unwrap_or_else(|| DEFAULT_IP.to_string()),
            port,
            log_level: pick(&args.log_level, "LOGLEVEL")
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_json,
            max_commands,
            smartctl_timeout: Duration::from_secs(smartctl_timeout),
            inventory,
            sources: files.loaded().to_vec(),
        })
    }

    /// `ip:port`, with IPv6 addresses bracketed
    pub fn bind_addr(&self) -> String {
        if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", key, raw))),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
