//! `cargo test` against a live collector.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::dto::ENV_COLLECTOR_ADDR;
use crate::ports::TestRunner;

pub struct CargoTestRunner {
    cargo: String,
}

impl Default for CargoTestRunner {
    fn default() -> Self {
        Self {
            cargo: std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()),
        }
    }
}

impl CargoTestRunner {
    /// Test-target selection for one test file: integration tests run by
    /// name, everything else through the library's unit tests.
    pub fn target_args(project_dir: &Path, test_path: &Path) -> Vec<String> {
        let relative = test_path.strip_prefix(project_dir).unwrap_or(test_path);
        let mut components = relative.components().map(|c| c.as_os_str().to_string_lossy());
        match (components.next().as_deref(), relative.file_stem()) {
            (Some("tests"), Some(stem)) if relative.components().count() == 2 => {
                vec!["--test".to_string(), stem.to_string_lossy().into_owned()]
            }
            (Some("src"), _) if relative.ends_with("main.rs") || relative.starts_with("src/bin") => {
                vec!["--bins".to_string()]
            }
            _ => vec!["--lib".to_string()],
        }
    }
}

impl TestRunner for CargoTestRunner {
    fn run_tests(&self, project_dir: &Path, test_path: &Path, collector_addr: &str) -> Result<bool> {
        let target = Self::target_args(project_dir, test_path);
        info!("Running {} test {} in {}", self.cargo, target.join(" "), project_dir.display());
        let output = Command::new(&self.cargo)
            .arg("test")
            .arg("--quiet")
            .args(&target)
            .current_dir(project_dir)
            .env(ENV_COLLECTOR_ADDR, collector_addr)
            .output()
            .with_context(|| format!("Failed to run {} in {}", self.cargo, project_dir.display()))?;

        if !output.status.success() {
            warn!(
                "Tests failed in {} (exit code {:?})",
                project_dir.display(),
                output.status.code()
            );
        }
        Ok(output.status.success())
    }
}
