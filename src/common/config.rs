//! Configuration file support (`difftrace.toml`).
//!
//! Every section is optional; absent keys take the defaults below, and the
//! CLI overrides whatever the file sets.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ports::{FaultKind, MutationRule};

pub const DEFAULT_CONFIG_FILE: &str = "difftrace.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub render: RenderConfig,
    pub collector: CollectorConfig,
    pub probe: ProbeConfig,
    pub mutation: MutationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// One of `static`, `cha`, `rta`, `pointer`.
    pub algorithm: String,
    /// Include `#[cfg(test)]` code and use `#[test]` functions as roots.
    pub tests: bool,
    /// Stop after this many test paths produced a diff set.
    pub threshold: usize,
    /// Width of the baseline/mutated pool.
    pub workers: usize,
    /// Width of the per-module render pool.
    pub render_workers: usize,
    /// Merge dynamically collected graphs into the static ones.
    pub dynamic: bool,
    /// Sibling directory of the input that holds mutated variants.
    pub work_dir_name: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            algorithm: "pointer".to_string(),
            tests: true,
            threshold: 10,
            workers: 2,
            render_workers: 3,
            dynamic: false,
            work_dir_name: "difftrace_tmp".to_string(),
        }
    }
}

/// Raw filter options; parsed and validated by `domain::filter::RenderOpts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub focus: String,
    pub group: String,
    pub limit: String,
    pub ignore: String,
    pub include: String,
    pub nostd: bool,
    pub nointer: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            focus: String::new(),
            group: "pkg".to_string(),
            limit: String::new(),
            ignore: String::new(),
            include: String::new(),
            nostd: true,
            nointer: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub addr: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            addr: crate::api::dto::DEFAULT_COLLECTOR_ADDR.to_string(),
        }
    }
}

/// A dependency line added to an instrumented crate's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub version: Option<String>,
    pub path: Option<String>,
}

/// The diagnostic probe placed at divergent call sites, and the runtime the
/// collector probes link against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Path imported once per instrumented file, e.g. `tracing::warn`.
    pub import: String,
    /// Macro invoked by the diagnostic probe statement.
    pub macro_name: String,
    pub message: String,
    pub dependency: DependencySpec,
    pub runtime: DependencySpec,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            import: "tracing::warn".to_string(),
            macro_name: "warn".to_string(),
            message: "difftrace: divergent call".to_string(),
            dependency: DependencySpec {
                name: "tracing".to_string(),
                version: Some("0.1".to_string()),
                path: None,
            },
            runtime: DependencySpec {
                name: "difftrace".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                path: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// External mutation engine executable.
    pub program: Option<String>,
    pub args: Vec<String>,
    pub rules: Vec<MutationRule>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        let rules = [
            FaultKind::Sync,
            FaultKind::SwitchMissDefault,
            FaultKind::ExceptionUncaught,
            FaultKind::ExceptionShortcircuit,
            FaultKind::ExceptionUnhandled,
        ]
        .into_iter()
        .map(|fault| MutationRule::new(fault, "*.*.*.*"))
        .collect();
        Self {
            program: None,
            args: Vec::new(),
            rules,
        }
    }
}

impl Config {
    /// Load `path`, or the defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
