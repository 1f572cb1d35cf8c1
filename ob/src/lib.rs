//! orbatch - batch command interpreter for opt RPC sessions
//!
//! Reads a command script, expands its includes, and replays the resulting
//! directives against a live TCP connection to an opt RPC service, checking
//! returned option values along the way.
//!
//! # Architecture
//!
//! ```text
//! script file ──► script::load_script ──► Script (flat Vec<Directive>)
//!                                              │
//!            RunDriver ── outer loop ── Session::connect
//!                              └── inner loop ── Interpreter::run ──► output sink
//! ```
//!
//! # Script syntax
//!
//! ```text
//! orcmd                  # Normal opt rpc command
//! -inc another-file      # Include another cmd file
//! -loop loop-count       # Loop the block
//! -endloop               # Loop till here
//! -sleep millisecond     # Pause execution a while
//! -msg message           # Print directly to the output
//! -time                  # Print a timestamp to the output
//! -check <opt> <wanted>  # Read an option and compare it
//! ```
//!
//! # Modules
//!
//! - [`script`] - Directive parsing and include-expanding loader
//! - [`interp`] - Cursor-based directive interpreter
//! - [`session`] - TCP session client and the `Transport` seam
//! - [`protocol`] - Reply decoding and check comparison
//! - [`driver`] - Outer/inner run loops and connection lifecycle
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod driver;
pub mod interp;
pub mod protocol;
pub mod script;
pub mod session;

pub use config::{Config, OutputTarget, RunConfig};
pub use driver::{RunDriver, RunError, RunReport};
pub use interp::{Interpreter, InterpreterStats};
pub use protocol::{CheckOutcome, Reply};
pub use script::{Directive, LoadError, Script, load_script};
pub use session::{Session, SessionError, SessionOptions, Transport};

/// Default server address
pub const DEFAULT_SERVER: &str = "localhost";

/// Default server port
pub const DEFAULT_PORT: u16 = 9000;

/// Largest reply read in one `recv` (512KB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 512 * 1024;

/// Line terminator used for every line written to the output sink
pub const CRLF: &str = "\r\n";
