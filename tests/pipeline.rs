/// End-to-end runs of the differential pipeline over a throw-away crate,
/// with an in-process mutation engine standing in for the external one.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use difftrace::api::client;
use difftrace::application::Pipeline;
use difftrace::common::config::Config;
use difftrace::domain::callgraph::CallChain;
use difftrace::domain::diff::{Diff, Side};
use difftrace::domain::inject::InjectionOutcome;
use difftrace::infrastructure::project_loader::ProjectLoader;
use difftrace::ports::{MutationEngine, MutationRule, TestRunner};
use tempfile::{tempdir, TempDir};

const LIB: &str = r#"pub fn validate(x: u32) -> bool {
    x > 0
}

pub fn store(x: u32) -> u32 {
    x * 2
}

pub fn process(x: u32) -> u32 {
    if validate(x) {
        store(x)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process() {
        assert_eq!(process(2), 4);
    }
}
"#;

const FLOW: &str = r#"#[test]
fn flow() {
    assert_eq!(demo::process(3), 6);
}
"#;

fn fixture() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path().join("demo");
    ProjectLoader::create_file(
        &root.join("Cargo.toml"),
        b"[package]\nname = \"demo\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
    )
    .unwrap();
    ProjectLoader::create_file(&root.join("src/lib.rs"), LIB.as_bytes()).unwrap();
    dir
}

fn copy_dir(from: &Path, to: &Path) {
    for entry in fs::read_dir(from).unwrap() {
        let path = entry.unwrap().path();
        let target = to.join(path.file_name().unwrap());
        if path.is_dir() {
            copy_dir(&path, &target);
        } else {
            ProjectLoader::create_file(&target, &fs::read(&path).unwrap()).unwrap();
        }
    }
}

/// Copies the crate and rewrites one snippet of `src/lib.rs`.
struct RewriteMutator {
    from: &'static str,
    to: &'static str,
}

impl MutationEngine for RewriteMutator {
    fn mutate(&self, source_dir: &Path, output_dir: &Path, _test_path: &Path, _rules: &[MutationRule]) -> Result<()> {
        copy_dir(source_dir, output_dir);
        let lib = output_dir.join("src/lib.rs");
        let source = fs::read_to_string(&lib)?;
        fs::write(&lib, source.replace(self.from, self.to))?;
        Ok(())
    }
}

struct FailingMutator;

impl MutationEngine for FailingMutator {
    fn mutate(&self, _: &Path, _: &Path, _: &Path, _: &[MutationRule]) -> Result<()> {
        bail!("mutator crashed")
    }
}

struct NoTests;

impl TestRunner for NoTests {
    fn run_tests(&self, _: &Path, _: &Path, _: &str) -> Result<bool> {
        Ok(true)
    }
}

fn static_config() -> Config {
    let mut config = Config::default();
    config.analysis.algorithm = "static".to_string();
    config
}

const DROP_VALIDATE: RewriteMutator = RewriteMutator {
    from: "if validate(x) {",
    to: "if true {",
};

#[test]
fn test_divergent_call_is_instrumented() {
    let dir = fixture();
    let input = dir.path().join("demo");
    let output = dir.path().join("out");
    let config = static_config();
    let pipeline = Pipeline::new(&config, &DROP_VALIDATE, &NoTests).unwrap();

    let summary = pipeline.run(&input, &output).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.diffs.len(), 1, "{:?}", summary.diffs);
    match &summary.diffs[0] {
        Diff::OneSidedMissing { side, node } => {
            assert_eq!(*side, Side::A);
            assert_eq!(node.caller.canonical(), "demo::process");
            assert_eq!(node.callee.canonical(), "demo::validate");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(summary.report.inserted(), 1);

    let lib = fs::read_to_string(output.join("src/lib.rs")).unwrap();
    assert!(lib.contains("use tracing::warn;"));
    let cond = lib.find("if validate(x)").unwrap();
    let probe = lib.find("warn!(\"difftrace: divergent call\")").unwrap();
    let store = lib.find("store(x)\n").unwrap();
    assert!(cond < probe && probe < store, "{}", lib);

    let manifest = fs::read_to_string(output.join("Cargo.toml")).unwrap();
    assert!(manifest.contains("tracing"));
    assert!(!dir.path().join("difftrace_tmp").exists());
}

#[test]
fn test_second_run_adds_nothing() {
    let dir = fixture();
    let input = dir.path().join("demo");
    let once = dir.path().join("once");
    let twice = dir.path().join("twice");
    let config = static_config();
    let pipeline = Pipeline::new(&config, &DROP_VALIDATE, &NoTests).unwrap();

    pipeline.run(&input, &once).unwrap();
    let summary = pipeline.run(&once, &twice).unwrap();
    assert_eq!(summary.report.inserted(), 0);
    assert_eq!(summary.report.count(InjectionOutcome::AlreadyInstrumented), 1);
    assert_eq!(
        fs::read_to_string(once.join("src/lib.rs")).unwrap(),
        fs::read_to_string(twice.join("src/lib.rs")).unwrap()
    );
}

#[test]
fn test_identical_variant_leaves_sources_alone() {
    let dir = fixture();
    let input = dir.path().join("demo");
    let output = dir.path().join("out");
    let config = static_config();
    let unchanged = RewriteMutator { from: "", to: "" };
    let pipeline = Pipeline::new(&config, &unchanged, &NoTests).unwrap();

    let summary = pipeline.run(&input, &output).unwrap();
    assert!(summary.diffs.is_empty());
    assert_eq!(fs::read_to_string(output.join("src/lib.rs")).unwrap(), LIB);
}

#[test]
fn test_fails_only_when_every_test_path_fails() {
    let dir = fixture();
    let input = dir.path().join("demo");
    let config = static_config();
    let pipeline = Pipeline::new(&config, &FailingMutator, &NoTests).unwrap();

    let err = pipeline.run(&input, &dir.path().join("out")).unwrap_err();
    assert!(err.to_string().contains("failed"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_threshold_stops_early() {
    let dir = fixture();
    let input = dir.path().join("demo");
    ProjectLoader::create_file(&input.join("tests/flow.rs"), FLOW.as_bytes()).unwrap();
    let mut config = static_config();
    config.analysis.threshold = 1;
    let pipeline = Pipeline::new(&config, &DROP_VALIDATE, &NoTests).unwrap();

    let summary = pipeline.run(&input, &dir.path().join("out")).unwrap();
    assert_eq!(summary.test_paths, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
}

/// Plays the instrumented test suite: checks the collector probes are in
/// place and reports one call only the baseline makes.
struct ReportingRunner;

impl TestRunner for ReportingRunner {
    fn run_tests(&self, project_dir: &Path, _test_path: &Path, collector_addr: &str) -> Result<bool> {
        let lib = fs::read_to_string(project_dir.join("src/lib.rs"))?;
        let run = if lib.contains("difftrace::probe!(0u32") {
            0
        } else if lib.contains("difftrace::probe!(1u32") {
            1
        } else {
            bail!("{} has no collector probes", project_dir.display());
        };
        if run == 0 {
            let chain = CallChain::from_stack(&["demo::process", "demo::audit"]);
            client::send_stack(collector_addr, run, &chain)?;
        }
        Ok(true)
    }
}

#[test]
fn test_dynamic_edges_join_the_static_graph() {
    let dir = fixture();
    let input = dir.path().join("demo");
    let mut config = static_config();
    config.analysis.dynamic = true;
    config.collector.addr = "127.0.0.1:0".to_string();
    let pipeline = Pipeline::new(&config, &DROP_VALIDATE, &ReportingRunner).unwrap();

    let diffs = pipeline.generate_diff(&input, &input.join("src/lib.rs")).unwrap();
    let pairs: Vec<(String, String)> = diffs.iter().map(|d| (d.caller(), d.callee())).collect();
    assert!(pairs.contains(&("demo::process".to_string(), "demo::validate".to_string())));
    assert!(pairs.contains(&("demo::process".to_string(), "demo::audit".to_string())));
    let probed: PathBuf = dir.path().join("difftrace_tmp");
    assert!(!probed.exists());
}
