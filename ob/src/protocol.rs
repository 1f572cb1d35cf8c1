//! opt RPC reply decoding and check comparison
//!
//! Replies are plain text. The first line is a status line (`0 OK` on
//! success, `1 <reason>` otherwise) and, for `og <opt>`, the second line
//! holds the option value. The service NUL-terminates what it sends.

use std::fmt;

use tracing::debug;

/// Status line the service sends on success
pub const SUCCESS_STATUS: &str = "0 OK";

/// Request prefix for reading an option
pub const OPT_GET: &str = "og";

/// First characters of option names whose values compare as integers
pub const NUMERIC_KINDS: [char; 3] = ['i', 'b', 'e'];

/// Decode raw reply bytes into display text
///
/// Invalid UTF-8 is replaced rather than rejected; surrounding whitespace and
/// NUL padding are removed.
pub fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Build the request that reads `opt`
pub fn opt_get_request(opt: &str) -> String {
    format!("{} {}", OPT_GET, opt)
}

/// Expand the two-character `\r\n` escape so one script line can carry a
/// multi-line request
pub fn expand_line_escapes(line: &str) -> String {
    line.replace("\\r\\n", "\n")
}

/// A decoded reply split into lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    lines: Vec<String>,
}

impl Reply {
    /// Split decoded reply text into lines (`\r\n` or `\n`)
    pub fn parse(text: &str) -> Self {
        let lines = text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect();
        Self { lines }
    }

    /// First line; empty if the reply was empty
    pub fn status(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_success(&self) -> bool {
        self.status() == SUCCESS_STATUS
    }

    /// Second line, the value of an `og` reply
    pub fn value(&self) -> Option<&str> {
        self.lines.get(1).map(String::as_str)
    }
}

/// Result of comparing a reply against an expected literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Match,

    /// Values differ; numeric options carry their parsed integers
    Mismatch { expected: String, actual: String },

    /// The service rejected the read
    StatusError { status: String },

    /// Success status without a value line
    MissingValue,
}

impl CheckOutcome {
    /// Output line for a failed check, `None` on match
    pub fn report(&self, opt: &str, wanted: &str) -> Option<String> {
        match self {
            CheckOutcome::Match => None,
            CheckOutcome::Mismatch { expected, actual } => {
                Some(format!("<CHECK ERR>: OPT<{}>, VAL<{}>, RET<{}>", opt, expected, actual))
            }
            CheckOutcome::StatusError { status } => {
                Some(format!("<CHECK ERR>: OPT<{}>, VAL<{}>, ERROR<{}>", opt, wanted, status))
            }
            CheckOutcome::MissingValue => Some(format!("<CHECK ERR>: OPT<{}>, VAL<{}>, RET<>", opt, wanted)),
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Match => f.write_str("match"),
            CheckOutcome::Mismatch { expected, actual } => write!(f, "expected {}, got {}", expected, actual),
            CheckOutcome::StatusError { status } => write!(f, "status {}", status),
            CheckOutcome::MissingValue => f.write_str("missing value"),
        }
    }
}

/// True if values of `opt` compare as integers
pub fn is_numeric_opt(opt: &str) -> bool {
    opt.chars().next().is_some_and(|c| NUMERIC_KINDS.contains(&c))
}

/// Compare an `og <opt>` reply with the wanted value
///
/// Numeric options fall back to string comparison when either side does not
/// parse as an integer.
pub fn compare(opt: &str, wanted: &str, reply: &Reply) -> CheckOutcome {
    debug!(%opt, %wanted, status = %reply.status(), "compare: called");
    if !reply.is_success() {
        return CheckOutcome::StatusError {
            status: reply.status().to_string(),
        };
    }

    let Some(actual) = reply.value() else {
        return CheckOutcome::MissingValue;
    };

    if is_numeric_opt(opt) {
        if let (Ok(want), Ok(got)) = (wanted.trim().parse::<i64>(), actual.trim().parse::<i64>()) {
            debug!(%want, %got, "compare: numeric comparison");
            return if want == got {
                CheckOutcome::Match
            } else {
                CheckOutcome::Mismatch {
                    expected: want.to_string(),
                    actual: got.to_string(),
                }
            };
        }
        debug!("compare: numeric option with non-integer value, comparing as strings");
    }

    if actual == wanted {
        CheckOutcome::Match
    } else {
        CheckOutcome::Mismatch {
            expected: wanted.to_string(),
            actual: actual.to_string(),
        }
    }
}
