//! Directive interpreter
//!
//! Walks a directive sequence with a single cursor. `run` returns the index
//! just past the block it consumed: a loop body ends at its `-endloop`, which
//! hands control back to the enclosing `-loop`. The same sequence is
//! re-interpreted for every repetition; nothing is re-parsed.
//!
//! All output goes to the sink handed in by the caller, one `\r\n`-terminated
//! line per event:
//!
//! ```text
//! <MSG>: text
//! <TIME>: 2024-01-31 12-00-00 1706702400.123456789
//! <CHECK>: ival 5
//! <CHECK ERR>: OPT<ival>, VAL<5>, RET<6>
//! <CMD>: og ival
//! 0 OK
//! ```

use std::io::{self, Write};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, warn};

use crate::CRLF;
use crate::protocol::{self, Reply};
use crate::script::Directive;
use crate::session::{SessionError, Transport};

/// Counters collected while interpreting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterpreterStats {
    /// Requests sent, raw and check reads alike
    pub requests: u64,
    pub checks: u64,
    pub check_failures: u64,
    pub io_errors: u64,
}

impl InterpreterStats {
    pub fn merge(&mut self, other: &InterpreterStats) {
        self.requests += other.requests;
        self.checks += other.checks;
        self.check_failures += other.check_failures;
        self.io_errors += other.io_errors;
    }
}

/// Executes directives against an optional transport
///
/// Without a transport only the trace lines are written; nothing is sent.
pub struct Interpreter<'a> {
    out: &'a mut dyn Write,
    transport: Option<&'a mut dyn Transport>,
    stats: InterpreterStats,
}

impl<'a> Interpreter<'a> {
    pub fn new(out: &'a mut dyn Write, transport: Option<&'a mut dyn Transport>) -> Self {
        Self {
            out,
            transport,
            stats: InterpreterStats::default(),
        }
    }

    /// Interpreter that traces directives without sending anything
    pub fn detached(out: &'a mut dyn Write) -> Self {
        Self::new(out, None)
    }

    pub fn stats(&self) -> &InterpreterStats {
        &self.stats
    }

    /// Interpret the whole sequence
    ///
    /// An `-endloop` with no open loop ends a `run` early; execution resumes
    /// right after it so the rest of the sequence still runs.
    pub async fn run_all(&mut self, sequence: &[Directive]) -> io::Result<()> {
        let mut cursor = 0;
        while cursor < sequence.len() {
            cursor = self.run(sequence, cursor).await?;
            if cursor < sequence.len() {
                warn!(index = cursor - 1, "Unmatched -endloop, continuing after it");
            }
        }
        self.out.flush()
    }

    /// Interpret `sequence` from `start` until an `-endloop` or the end
    ///
    /// Returns the index after the consumed block. Only failures to write
    /// the output are errors; service failures are reported in the output.
    pub async fn run(&mut self, sequence: &[Directive], start: usize) -> io::Result<usize> {
        debug!(start, len = sequence.len(), "Interpreter::run: called");
        let mut cursor = start;

        while let Some(directive) = sequence.get(cursor) {
            match directive {
                Directive::EndLoop => {
                    debug!(cursor, "Interpreter::run: end of loop body");
                    return Ok(cursor + 1);
                }
                Directive::Loop { count } => {
                    debug!(cursor, count, "Interpreter::run: entering loop");
                    let mut next = skip_block(sequence, cursor + 1);
                    for _ in 0..*count {
                        next = Box::pin(self.run(sequence, cursor + 1)).await?;
                    }
                    cursor = next;
                }
                Directive::Sleep { millis } => {
                    debug!(millis, "Interpreter::run: sleeping");
                    tokio::time::sleep(sleep_duration(*millis)).await;
                    cursor += 1;
                }
                Directive::Msg { text } => {
                    self.emit(&format!("<MSG>: {}", text))?;
                    cursor += 1;
                }
                Directive::Time => {
                    self.emit(&timestamp_line())?;
                    cursor += 1;
                }
                Directive::Check { opt, value } => {
                    self.check(opt, value).await?;
                    cursor += 1;
                }
                Directive::InvalidCheck { args } => {
                    self.emit(&format!("<CHECK>: {}", args))?;
                    self.emit(&format!("<CHECK ERR>: malformed check '{}'", args))?;
                    self.stats.check_failures += 1;
                    cursor += 1;
                }
                Directive::Raw { line } => {
                    self.raw(line).await?;
                    cursor += 1;
                }
            }
        }

        debug!(cursor, "Interpreter::run: reached end of sequence");
        Ok(sequence.len())
    }

    async fn check(&mut self, opt: &str, value: &str) -> io::Result<()> {
        self.emit(&format!("<CHECK>: {} {}", opt, value))?;
        let Some(transport) = self.transport.as_deref_mut() else {
            return Ok(());
        };

        self.stats.checks += 1;
        self.stats.requests += 1;
        let reply = match round_trip(transport, &protocol::opt_get_request(opt)).await {
            Ok(reply) => reply,
            Err(e) => return self.io_error(e),
        };

        let outcome = protocol::compare(opt, value, &Reply::parse(&reply));
        debug!(%opt, %outcome, "Interpreter::check: compared");
        if let Some(report) = outcome.report(opt, value) {
            self.stats.check_failures += 1;
            self.emit(&report)?;
        }
        Ok(())
    }

    async fn raw(&mut self, line: &str) -> io::Result<()> {
        self.emit(&format!("<CMD>: {}", line))?;
        let Some(transport) = self.transport.as_deref_mut() else {
            return Ok(());
        };

        self.stats.requests += 1;
        match round_trip(transport, &protocol::expand_line_escapes(line)).await {
            Ok(reply) => self.emit(&reply),
            Err(e) => self.io_error(e),
        }
    }

    fn io_error(&mut self, e: SessionError) -> io::Result<()> {
        warn!(%e, retryable = e.is_retryable(), "Request failed");
        self.stats.io_errors += 1;
        self.emit(&format!("<IO ERR>: {}", e))
    }

    fn emit(&mut self, line: &str) -> io::Result<()> {
        write!(self.out, "{}{}", line, CRLF)
    }
}

async fn round_trip<T: Transport + ?Sized>(transport: &mut T, request: &str) -> Result<String, SessionError> {
    transport.send(request).await?;
    transport.recv().await
}

/// Sleep length for `-sleep <millis>`; values a `Duration` cannot hold sleep 0
fn sleep_duration(millis: f64) -> Duration {
    if millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(millis / 1000.0).unwrap_or_else(|e| {
        warn!(millis, %e, "Sleep out of range, not sleeping");
        Duration::ZERO
    })
}

/// Index just past the `-endloop` closing the body that starts at `start`
fn skip_block(sequence: &[Directive], start: usize) -> usize {
    let mut depth = 0usize;
    for (i, directive) in sequence.iter().enumerate().skip(start) {
        match directive {
            Directive::Loop { .. } => depth += 1,
            Directive::EndLoop if depth == 0 => return i + 1,
            Directive::EndLoop => depth -= 1,
            _ => {}
        }
    }
    sequence.len()
}

fn timestamp_line() -> String {
    let now = Local::now();
    format!(
        "<TIME>: {} {}.{:09}",
        now.format("%Y-%m-%d %H-%M-%S"),
        now.timestamp(),
        now.timestamp_subsec_nanos()
    )
}
