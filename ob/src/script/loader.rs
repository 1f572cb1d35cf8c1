//! Include-expanding script loader
//!
//! Scripts are read line by line. `-inc <path>` lines are replaced by the
//! directives of the included file; the stack of files currently being
//! loaded is tracked so a file that (transitively) includes itself is
//! reported instead of recursing forever.
//!
//! A failure in an included file is absorbed: the branch contributes no
//! directives, a diagnostic is recorded, and loading continues with the
//! sibling lines. Only the root file failing to open is fatal.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::directive::{Directive, INCLUDE_PREFIX};
use super::error::LoadError;

/// Length of the session token injected by [`normalize_hey`]
const HEY_TOKEN_LEN: usize = 32;

/// Distinguishes tokens minted within the same clock tick
static HEY_SEQ: AtomicU64 = AtomicU64::new(0);

/// A fully loaded, include-expanded command script
#[derive(Debug, Clone, Default)]
pub struct Script {
    directives: Vec<Directive>,
    diagnostics: Vec<String>,
}

impl Script {
    /// Build a script from already-parsed directives
    pub fn from_directives(directives: Vec<Directive>) -> Self {
        Self {
            directives,
            diagnostics: Vec::new(),
        }
    }

    /// Parse script text that has no includes
    pub fn parse_str(text: &str) -> Self {
        let directives = script_lines(text).map(|line| Directive::parse(&normalize_hey(line))).collect();
        Self::from_directives(directives)
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Problems absorbed during loading, in the order they were found
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

/// Load the script at `path`, expanding includes
///
/// Returns an error only if the root file itself cannot be read.
pub fn load_script(path: &Path) -> Result<Script, LoadError> {
    debug!(?path, "load_script: called");
    let mut loader = Loader::default();
    let mut active = Vec::new();
    let directives = loader.load(path, &mut active)?;
    debug_assert!(active.is_empty());

    info!(
        ?path,
        directives = directives.len(),
        diagnostics = loader.diagnostics.len(),
        "Loaded script"
    );
    Ok(Script {
        directives,
        diagnostics: loader.diagnostics,
    })
}

#[derive(Default)]
struct Loader {
    diagnostics: Vec<String>,
}

impl Loader {
    fn load(&mut self, path: &Path, active: &mut Vec<PathBuf>) -> Result<Vec<Directive>, LoadError> {
        debug!(?path, depth = active.len(), "Loader::load: called");
        let key = include_key(path);
        if active.contains(&key) {
            debug!(?path, "Loader::load: path already on include stack");
            return Err(LoadError::CyclicInclude {
                path: path.to_path_buf(),
                stack: active.clone(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut directives = Vec::new();
        for line in script_lines(&text) {
            if let Some(include) = line.strip_prefix(INCLUDE_PREFIX) {
                let include = Path::new(include.trim());
                debug!(?include, "Loader::load: following include");
                active.push(key.clone());
                let result = self.load(include, active);
                active.pop();

                match result {
                    Ok(included) => directives.extend(included),
                    Err(e) => {
                        warn!(?path, %e, "Include failed, skipping branch");
                        self.diagnostics.push(e.diagnostic());
                    }
                }
            } else {
                directives.push(Directive::parse(&normalize_hey(line)));
            }
        }
        Ok(directives)
    }
}

/// Non-blank lines with leading whitespace and line terminators removed
fn script_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.trim_start().trim_end_matches(['\r', '\n']))
        .filter(|line| !line.is_empty())
}

/// Identity used for cycle detection; falls back to the path as written
fn include_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Replace the connection hash of a `hey o telnet <hash> <user> <pass>` line
///
/// The service keys clients by that hash, so every script load gets a fresh
/// one. Lines that do not match are returned unchanged.
pub fn normalize_hey(line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 6 || tokens[..3] != ["hey", "o", "telnet"] {
        return line.to_string();
    }

    let token = fresh_token();
    debug!(%token, "normalize_hey: injecting connection hash");
    let mut rewritten = vec!["hey", "o", "telnet", token.as_str()];
    rewritten.extend_from_slice(&tokens[4..]);
    rewritten.join(" ")
}

fn fresh_token() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let seq = HEY_SEQ.fetch_add(1, Ordering::Relaxed);
    let seed = format!("{}.{:09}-{}", now.as_secs(), now.subsec_nanos(), seq);

    let mut token = hex::encode(Sha256::digest(seed.as_bytes()));
    token.truncate(HEY_TOKEN_LEN);
    token
}
