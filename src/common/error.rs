//! Error taxonomy for difftrace.
//!
//! Domain errors are typed so callers can react to them (retry a cheaper
//! algorithm, skip a test path). The pipeline and the CLI wrap them in
//! `anyhow::Error` with path context.

use std::path::PathBuf;

use thiserror::Error;

/// Source could not be read or parsed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every file that failed to parse, so one run reports all of them.
    #[error("{} file(s) failed to parse: {}", failures.len(), summarize(failures))]
    Parse { failures: Vec<(PathBuf, String)> },

    #[error("no Cargo.toml package name found under {}", path.display())]
    MissingManifest { path: PathBuf },
}

fn summarize(failures: &[(PathBuf, String)]) -> String {
    failures
        .iter()
        .map(|(path, msg)| format!("{}: {}", path.display(), msg))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Call-graph algorithm selection failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error("invalid call graph type: {0}")]
    Unknown(String),

    #[error("no entry packages: the selected algorithm needs a `main` or `#[test]` root")]
    NoEntryPoints,
}

/// Everything the static builder can fail with.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterConfigError {
    #[error("invalid group option: {0} (expected `pkg` or `type`)")]
    InvalidGroup(String),
}

/// A probe could not deliver its call chain to the collector.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("cannot reach collector at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("collector connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed collector message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("collector rejected report: {0}")]
    Remote(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("empty function identifier")]
    Empty,

    #[error("malformed function identifier `{0}`")]
    Malformed(String),
}
