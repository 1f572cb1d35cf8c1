//! orbatch configuration types and loading
//!
//! File configuration supplies defaults for the connection and run loops;
//! command-line flags override it. The result is a [`RunConfig`] that is
//! fixed for the whole run.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionOptions;

/// Largest reply buffer a config file may ask for
pub const MAX_RESPONSE_BYTES_LIMIT: usize = 64 * 1024 * 1024;

/// Settings read from `orbatch.yml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service host name or address
    pub server: String,

    /// Service port
    pub port: u16,

    /// Outer loop count (fresh connection per iteration)
    pub outer: u32,

    /// Inner loop count (script repeats on one connection)
    pub inner: u32,

    /// Connect timeout in milliseconds
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single reply in milliseconds
    #[serde(rename = "read-timeout-ms")]
    pub read_timeout_ms: u64,

    /// Largest reply read per request
    #[serde(rename = "max-response-bytes")]
    pub max_response_bytes: usize,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: crate::DEFAULT_SERVER.to_string(),
            port: crate::DEFAULT_PORT,
            outer: 1,
            inner: 1,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            max_response_bytes: crate::DEFAULT_MAX_RESPONSE_BYTES,
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .orbatch.yml
        let local_config = PathBuf::from(".orbatch.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/orbatch/orbatch.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orbatch").join("orbatch.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_response_bytes: self.max_response_bytes.clamp(1, MAX_RESPONSE_BYTES_LIMIT),
        }
    }
}

/// Where trace output goes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    #[default]
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// Open the sink; a file target is created or truncated
    pub fn open(&self) -> io::Result<Box<dyn Write + Send>> {
        match self {
            OutputTarget::Stdout => Ok(Box::new(io::stdout())),
            OutputTarget::File(path) => Ok(Box::new(io::BufWriter::new(fs::File::create(path)?))),
        }
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub server: String,
    pub port: u16,
    pub outer: u32,
    pub inner: u32,
    pub script: PathBuf,
    pub output: OutputTarget,
    pub session: SessionOptions,

    /// Trace the script without connecting
    pub dry_run: bool,
}

impl RunConfig {
    /// Run configuration using file settings only
    pub fn from_config(config: &Config, script: impl Into<PathBuf>) -> Self {
        Self {
            server: config.server.clone(),
            port: config.port,
            outer: config.outer,
            inner: config.inner,
            script: script.into(),
            output: OutputTarget::Stdout,
            session: config.session_options(),
            dry_run: false,
        }
    }
}
