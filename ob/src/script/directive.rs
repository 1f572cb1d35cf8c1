//! Typed script directives
//!
//! Every non-blank, non-include script line parses into exactly one
//! [`Directive`]. Prefixes are tested in a fixed order: `-endloop` must be
//! tested before `-loop ` and anything that matches no prefix is a raw RPC
//! request.

use std::fmt;

use tracing::{debug, warn};

/// Include marker, resolved by the loader and never parsed into a directive
pub const INCLUDE_PREFIX: &str = "-inc ";

const ENDLOOP_PREFIX: &str = "-endloop";
const LOOP_PREFIX: &str = "-loop ";
const SLEEP_PREFIX: &str = "-sleep ";
const MSG_PREFIX: &str = "-msg ";
const CHECK_PREFIX: &str = "-check ";
const TIME_PREFIX: &str = "-time";

/// Loop count used when the `-loop` argument does not parse
pub const DEFAULT_LOOP_COUNT: u64 = 1;

/// One instruction from a command script
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Repeat the following block `count` times
    Loop { count: u64 },

    /// End of the innermost loop body
    EndLoop,

    /// Pause the run
    Sleep { millis: f64 },

    /// Write a message line to the output
    Msg { text: String },

    /// Write a timestamp line to the output
    Time,

    /// Read `opt` from the service and compare it with `value`
    Check { opt: String, value: String },

    /// A `-check` line without both an option and a value
    InvalidCheck { args: String },

    /// Literal request sent to the service
    Raw { line: String },
}

impl Directive {
    /// Parse one script line (leading whitespace already trimmed)
    pub fn parse(line: &str) -> Self {
        debug!(%line, "Directive::parse: called");
        if line.starts_with(ENDLOOP_PREFIX) {
            Directive::EndLoop
        } else if let Some(arg) = line.strip_prefix(LOOP_PREFIX) {
            Directive::Loop {
                count: parse_loop_count(arg),
            }
        } else if let Some(arg) = line.strip_prefix(SLEEP_PREFIX) {
            Directive::Sleep {
                millis: parse_sleep_millis(arg),
            }
        } else if let Some(text) = line.strip_prefix(MSG_PREFIX) {
            Directive::Msg { text: text.to_string() }
        } else if let Some(args) = line.strip_prefix(CHECK_PREFIX) {
            parse_check(args)
        } else if line.starts_with(TIME_PREFIX) {
            Directive::Time
        } else {
            Directive::Raw { line: line.to_string() }
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Loop { count } => write!(f, "{}{}", LOOP_PREFIX, count),
            Directive::EndLoop => f.write_str(ENDLOOP_PREFIX),
            Directive::Sleep { millis } => write!(f, "{}{}", SLEEP_PREFIX, millis),
            Directive::Msg { text } => write!(f, "{}{}", MSG_PREFIX, text),
            Directive::Time => f.write_str(TIME_PREFIX),
            Directive::Check { opt, value } => write!(f, "{}{} {}", CHECK_PREFIX, opt, value),
            Directive::InvalidCheck { args } => write!(f, "{}{}", CHECK_PREFIX, args),
            Directive::Raw { line } => f.write_str(line),
        }
    }
}

/// Negative counts run the body zero times; garbage runs it once
fn parse_loop_count(arg: &str) -> u64 {
    match arg.trim().parse::<i64>() {
        Ok(n) => n.max(0) as u64,
        Err(e) => {
            warn!(%arg, %e, "parse_loop_count: bad loop count, using default");
            DEFAULT_LOOP_COUNT
        }
    }
}

fn parse_sleep_millis(arg: &str) -> f64 {
    match arg.trim().parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms > 0.0 => ms,
        Ok(ms) => {
            warn!(%ms, "parse_sleep_millis: non-positive sleep, not sleeping");
            0.0
        }
        Err(e) => {
            warn!(%arg, %e, "parse_sleep_millis: bad sleep value, not sleeping");
            0.0
        }
    }
}

/// First token is the option name, the rest of the line is the wanted value
fn parse_check(args: &str) -> Directive {
    let args = args.trim();
    match args.split_once(char::is_whitespace) {
        Some((opt, value)) if !value.trim().is_empty() => Directive::Check {
            opt: opt.to_string(),
            value: value.trim().to_string(),
        },
        _ => {
            warn!(%args, "parse_check: check needs an option and a value");
            Directive::InvalidCheck { args: args.to_string() }
        }
    }
}
