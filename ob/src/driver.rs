//! Run driver
//!
//! Loads the script once, then for every outer iteration opens a fresh
//! [`Session`], interprets the script `inner` times on it, and closes it
//! again. Nothing carries over between outer iterations. A failed connect
//! skips its iteration; only an unusable script stops the run.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::CRLF;
use crate::config::RunConfig;
use crate::interp::{Interpreter, InterpreterStats};
use crate::script::{LoadError, Script, load_script};
use crate::session::{Session, Transport};

/// Errors that stop a run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("No commands found in {}", path.display())]
    EmptyScript { path: PathBuf },

    #[error("Failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl RunError {
    /// Usage errors are the caller's fault (no script to run)
    pub fn is_usage(&self) -> bool {
        matches!(self, RunError::EmptyScript { .. })
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Outer iterations that connected and ran
    pub outer_completed: u32,
    pub connect_failures: u32,
    /// True if an interrupt stopped the run early
    pub interrupted: bool,
    pub stats: InterpreterStats,
}

impl RunReport {
    /// True if every connect and check succeeded
    pub fn is_clean(&self) -> bool {
        self.connect_failures == 0 && self.stats.check_failures == 0 && self.stats.io_errors == 0
    }
}

/// Drives outer and inner iterations of one script
pub struct RunDriver {
    config: RunConfig,
    interrupt: Arc<AtomicBool>,
}

impl RunDriver {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a shared flag that stops the run before the next outer iteration
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Load the script and run it, writing all trace output to `out`
    pub async fn execute(&self, out: &mut dyn Write) -> Result<RunReport, RunError> {
        debug!(config = ?self.config, "RunDriver::execute: called");
        let script = load_script(&self.config.script)?;
        for diagnostic in script.diagnostics() {
            write!(out, "{}{}", diagnostic, CRLF)?;
        }
        if script.is_empty() {
            return Err(RunError::EmptyScript {
                path: self.config.script.clone(),
            });
        }
        self.execute_script(&script, out).await
    }

    /// Run an already loaded script
    pub async fn execute_script(&self, script: &Script, out: &mut dyn Write) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();
        let addr = format!("{}:{}", self.config.server, self.config.port);
        info!(%addr, outer = self.config.outer, inner = self.config.inner, dry_run = self.config.dry_run, "Starting run");

        for iteration in 1..=self.config.outer {
            if self.interrupted() {
                info!(iteration, "Interrupted, stopping before outer iteration");
                break;
            }
            debug!(iteration, "RunDriver::execute_script: outer iteration");

            if self.config.dry_run {
                if self.run_inner(script, out, None, &mut report.stats).await? {
                    report.outer_completed += 1;
                }
                continue;
            }

            let mut session =
                match Session::connect(&self.config.server, self.config.port, self.config.session.clone()).await {
                    Ok(session) => session,
                    Err(e) => {
                        warn!(iteration, %e, retryable = e.is_retryable(), "Connect failed, skipping outer iteration");
                        report.connect_failures += 1;
                        write!(out, "<CONN ERR>: {}{}", e, CRLF)?;
                        continue;
                    }
                };

            let result = self.run_inner(script, out, Some(&mut session), &mut report.stats).await;
            session.close().await;
            if result? {
                report.outer_completed += 1;
            }
        }

        report.interrupted =
            self.interrupted() && report.outer_completed + report.connect_failures < self.config.outer;

        out.flush()?;
        info!(?report, "Run finished");
        Ok(report)
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Run the inner iterations; false if an interrupt cut them short
    async fn run_inner(
        &self,
        script: &Script,
        out: &mut dyn Write,
        mut session: Option<&mut Session>,
        stats: &mut InterpreterStats,
    ) -> io::Result<bool> {
        for iteration in 1..=self.config.inner {
            if self.interrupted() {
                info!(iteration, "Interrupted, stopping before inner iteration");
                return Ok(false);
            }
            debug!(iteration, "RunDriver::run_inner: inner iteration");
            let transport = session.as_deref_mut().map(|s| s as &mut dyn Transport);
            let mut interp = Interpreter::new(&mut *out, transport);
            interp.run_all(script.directives()).await?;
            stats.merge(interp.stats());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Echo-style service: answers every request with `0 OK` and counts connections
    async fn spawn_service() -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = sock.read(&mut buf).await {
                        if n == 0 || sock.write_all(b"0 OK\r\n\0").await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (port, connections)
    }

    fn run_config(temp: &TempDir, script: &str, port: u16) -> RunConfig {
        let path = temp.path().join("run.cmd");
        fs::write(&path, script).unwrap();
        let mut config = RunConfig::from_config(&Config::default(), path);
        config.server = "127.0.0.1".to_string();
        config.port = port;
        config
    }

    #[tokio::test]
    async fn test_each_outer_iteration_connects_fresh() {
        let (port, connections) = spawn_service().await;
        let temp = TempDir::new().unwrap();
        let mut config = run_config(&temp, "og a\n", port);
        config.outer = 2;

        let mut out = Vec::new();
        let report = RunDriver::new(config).execute(&mut out).await.unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(report.outer_completed, 2);
        assert_eq!(report.stats.requests, 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_inner_iterations_share_connection() {
        let (port, connections) = spawn_service().await;
        let temp = TempDir::new().unwrap();
        let mut config = run_config(&temp, "og a\nog b\n", port);
        config.inner = 3;

        let mut out = Vec::new();
        let report = RunDriver::new(config).execute(&mut out).await.unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 1);
        assert_eq!(report.stats.requests, 6);
    }

    #[tokio::test]
    async fn test_connect_failure_skips_iteration() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let temp = TempDir::new().unwrap();
        let mut config = run_config(&temp, "og a\n", port);
        config.outer = 2;

        let mut out = Vec::new();
        let report = RunDriver::new(config).execute(&mut out).await.unwrap();

        assert_eq!(report.connect_failures, 2);
        assert_eq!(report.outer_completed, 0);
        assert!(!report.is_clean());
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("<CONN ERR>:").count(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_connect() {
        let temp = TempDir::new().unwrap();
        let mut config = run_config(&temp, "-msg hi\nog a\n", 1);
        config.dry_run = true;
        config.inner = 2;

        let mut out = Vec::new();
        let report = RunDriver::new(config).execute(&mut out).await.unwrap();

        assert_eq!(report.connect_failures, 0);
        assert_eq!(report.stats.requests, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<MSG>: hi\r\n<CMD>: og a\r\n<MSG>: hi\r\n<CMD>: og a\r\n"
        );
    }

    #[tokio::test]
    async fn test_empty_script_is_usage_error() {
        let temp = TempDir::new().unwrap();
        let config = run_config(&temp, "\n   \n", 1);

        let err = RunDriver::new(config).execute(&mut Vec::new()).await.unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn test_missing_script_is_load_error() {
        let temp = TempDir::new().unwrap();
        let mut config = run_config(&temp, "og a\n", 1);
        config.script = temp.path().join("missing.cmd");

        let err = RunDriver::new(config).execute(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, RunError::Load(LoadError::Open { .. })));
        assert!(!err.is_usage());
    }

    #[tokio::test]
    async fn test_include_diagnostics_reach_output() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.cmd");
        let mut config = run_config(&temp, &format!("-inc {}\n-msg still here\n", missing.display()), 1);
        config.dry_run = true;

        let mut out = Vec::new();
        RunDriver::new(config).execute(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Error: Open cmdfile:"));
        assert!(text.ends_with("<MSG>: still here\r\n"));
    }

    #[tokio::test]
    async fn test_interrupt_stops_before_next_outer_iteration() {
        let temp = TempDir::new().unwrap();
        let mut config = run_config(&temp, "-msg hi\n", 1);
        config.dry_run = true;
        config.outer = 5;

        let interrupt = Arc::new(AtomicBool::new(true));
        let mut out = Vec::new();
        let report = RunDriver::new(config)
            .with_interrupt(interrupt)
            .execute(&mut out)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.outer_completed, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_stops_before_next_inner_iteration() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let interrupt = Arc::new(AtomicBool::new(false));
        let flag = interrupt.clone();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();

        // Raise the interrupt as soon as the first request arrives
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            while let Ok(n) = sock.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                flag.store(true, Ordering::SeqCst);
                if sock.write_all(b"0 OK\r\n\0").await.is_err() {
                    break;
                }
            }
        });

        let temp = TempDir::new().unwrap();
        let mut config = run_config(&temp, "og a\n", port);
        config.inner = 1000;

        let mut out = Vec::new();
        let report = RunDriver::new(config)
            .with_interrupt(interrupt)
            .execute(&mut out)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.outer_completed, 0);
        assert_eq!(report.stats.requests, 1);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
