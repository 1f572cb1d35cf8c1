//! Script loading error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading a command script
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Open cmdfile:{} failed", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recursive include found: rootfiles:{stack:?}, cmdfile:{}", path.display())]
    CyclicInclude { path: PathBuf, stack: Vec<PathBuf> },
}

impl LoadError {
    /// Diagnostic line written to the output sink when this error is absorbed
    pub fn diagnostic(&self) -> String {
        format!("Error: {}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_message() {
        let err = LoadError::Open {
            path: PathBuf::from("missing.cmd"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };

        assert_eq!(err.diagnostic(), "Error: Open cmdfile:missing.cmd failed");
    }

    #[test]
    fn test_cyclic_include_message() {
        let err = LoadError::CyclicInclude {
            path: PathBuf::from("a.cmd"),
            stack: vec![PathBuf::from("a.cmd"), PathBuf::from("b.cmd")],
        };

        let msg = err.diagnostic();
        assert!(msg.starts_with("Error: Recursive include found"));
        assert!(msg.contains("b.cmd"));
        assert!(msg.ends_with("cmdfile:a.cmd"));
    }
}
