//! Boundaries to the external tools the pipeline drives.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Fault classes the mutation engine knows how to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Drop synchronization (locks, joins, awaits).
    Sync,
    /// Remove the catch-all arm of a `match`.
    SwitchMissDefault,
    /// Turn a handled error into a panic.
    ExceptionUncaught,
    /// Return early on the error path.
    ExceptionShortcircuit,
    /// Ignore an error result.
    ExceptionUnhandled,
    ConditionInversed,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Sync => "sync",
            FaultKind::SwitchMissDefault => "switch_miss_default",
            FaultKind::ExceptionUncaught => "exception_uncaught",
            FaultKind::ExceptionShortcircuit => "exception_shortcircuit",
            FaultKind::ExceptionUnhandled => "exception_unhandled",
            FaultKind::ConditionInversed => "condition_inversed",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply `fault` wherever `pattern` matches. Patterns have four
/// dot-separated segments, `module.Type.method.variant`; `*` matches any
/// one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRule {
    pub fault: FaultKind,
    pub pattern: String,
}

impl MutationRule {
    pub fn new(fault: FaultKind, pattern: impl Into<String>) -> Self {
        Self {
            fault,
            pattern: pattern.into(),
        }
    }
}

impl fmt::Display for MutationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.fault, self.pattern)
    }
}

/// Produces a fault-mutated copy of a crate.
pub trait MutationEngine: Send + Sync {
    /// Write a mutated copy of `source_dir` into `output_dir`, mutating the
    /// code exercised by `test_path`.
    fn mutate(&self, source_dir: &Path, output_dir: &Path, test_path: &Path, rules: &[MutationRule]) -> anyhow::Result<()>;
}

/// Runs a crate's tests against a live collector.
pub trait TestRunner: Send + Sync {
    /// Returns whether the tests passed; failing tests are expected under
    /// mutation and are not an error.
    fn run_tests(&self, project_dir: &Path, test_path: &Path, collector_addr: &str) -> anyhow::Result<bool>;
}
