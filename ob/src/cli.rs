//! CLI argument parsing for orbatch

use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{Config, OutputTarget, RunConfig};

const SCRIPT_HELP: &str = "\
Cmd file line can be:
    orcmd                  # Normal opt rpc command.
    -inc another-file      # Include another cmd file.
    -loop loop-count       # Loop the block
    -endloop               # Loop till here.
    -sleep millisecond     # Pause execute a while.
    -msg message           # Direct print to out-file.
    -time                  # Print a timestamp to out-file
    -check <opt> <wanted>  # Read an opt and compare it with <wanted>

A \\r\\n inside an orcmd line is sent as a line break.";

/// orbatch - opt RPC batch runner
#[derive(Parser, Debug)]
#[command(name = "orbatch")]
#[command(author, version, about = "Run opt RPC command scripts against a server", long_about = None)]
#[command(after_help = SCRIPT_HELP)]
pub struct Cli {
    /// Command file to run
    #[arg(long = "cmd", value_name = "CMD_FILE")]
    pub cmd: PathBuf,

    /// Server address (default: localhost)
    #[arg(short = 'a', long)]
    pub server: Option<String>,

    /// Server port (default: 9000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Outer loop count, each iteration on a fresh connection (default: 1)
    #[arg(long = "outer", visible_alias = "lo", value_name = "COUNT")]
    pub outer: Option<u32>,

    /// Inner loop count, iterations share one connection (default: 1)
    #[arg(long = "inner", visible_alias = "li", value_name = "COUNT")]
    pub inner: Option<u32>,

    /// Output file (default: stdout)
    #[arg(long = "out", value_name = "OUT_FILE")]
    pub out: Option<PathBuf>,

    /// Timeout for a single reply in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Trace the script without connecting to the server
    #[arg(long)]
    pub dry_run: bool,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Merge flags over file configuration
    pub fn into_run_config(self, config: &Config) -> RunConfig {
        debug!(?self, "Cli::into_run_config: called");
        let mut run = RunConfig::from_config(config, self.cmd);

        if let Some(server) = self.server {
            run.server = server;
        }
        if let Some(port) = self.port {
            run.port = port;
        }
        if let Some(outer) = self.outer {
            run.outer = outer;
        }
        if let Some(inner) = self.inner {
            run.inner = inner;
        }
        if let Some(ms) = self.read_timeout_ms {
            run.session.read_timeout = std::time::Duration::from_millis(ms);
        }
        if let Some(out) = self.out {
            run.output = OutputTarget::File(out);
        }
        run.dry_run = self.dry_run;
        run
    }
}
