//! Mutation engine that shells out to an external program.
//!
//! The program is invoked as
//! `<program> <args..> --source <dir> --output <dir> --test <file> --rule <fault>=<pattern>..`
//! and must leave a complete mutated crate in the output directory.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::ports::{MutationEngine, MutationRule};

pub struct CommandMutationEngine {
    program: String,
    args: Vec<String>,
}

impl CommandMutationEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command(&self, source_dir: &Path, output_dir: &Path, test_path: &Path, rules: &[MutationRule]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--source")
            .arg(source_dir)
            .arg("--output")
            .arg(output_dir)
            .arg("--test")
            .arg(test_path);
        for rule in rules {
            cmd.arg("--rule").arg(rule.to_string());
        }
        cmd
    }
}

impl MutationEngine for CommandMutationEngine {
    fn mutate(&self, source_dir: &Path, output_dir: &Path, test_path: &Path, rules: &[MutationRule]) -> Result<()> {
        info!(
            "Mutating {} with {} rule(s) via {}",
            source_dir.display(),
            rules.len(),
            self.program
        );
        let output = self
            .command(source_dir, output_dir, test_path, rules)
            .output()
            .with_context(|| format!("{} not found in PATH", self.program))?;

        if !output.status.success() {
            bail!(
                "{} failed with exit code {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if !output_dir.join("Cargo.toml").exists() {
            bail!("Expected a mutated crate at: {}", output_dir.display());
        }
        Ok(())
    }
}
