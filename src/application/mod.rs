//! Differential pipeline: baseline vs. mutated call graphs per test path,
//! then probes at every divergent call site of the baseline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::api::server::Collector;
use crate::common::config::{Config, DependencySpec};
use crate::domain::builder::{build_call_graph, Algorithm, BuildRequest};
use crate::domain::callgraph::CallGraph;
use crate::domain::collect::insert_collector_tree;
use crate::domain::diff::{compare, dedup_diff, Diff};
use crate::domain::filter::{render, to_call_graph, RenderOpts};
use crate::domain::inject::{instrument_units, InjectionContext, InstrumentReport};
use crate::infrastructure::concurrency::{Task, TaskGroup};
use crate::infrastructure::project_loader::ProjectLoader;
use crate::ports::{MutationEngine, TestRunner};

/// Builds and renders the call graph of one crate.
pub struct AnalyzeUsecase {
    pub opts: RenderOpts,
    pub algorithm: Algorithm,
    pub include_tests: bool,
    render_tasks: TaskGroup,
}

impl AnalyzeUsecase {
    /// Validates every option up front so a bad flag fails before any work.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            opts: RenderOpts::parse(&config.render)?,
            algorithm: config.analysis.algorithm.parse()?,
            include_tests: config.analysis.tests,
            render_tasks: TaskGroup::new(config.analysis.render_workers)?,
        })
    }

    /// Rendered call graph of the crate at `root`, with the tests in
    /// `entries` as roots.
    pub fn graph(&self, root: &Path, entries: &[PathBuf]) -> Result<CallGraph> {
        let request = BuildRequest {
            root: root.to_path_buf(),
            entries: entries.to_vec(),
            include_tests: self.include_tests,
            algorithm: self.algorithm,
        };
        let raw = build_call_graph(&request)
            .with_context(|| format!("Failed to build the call graph of {}", root.display()))?;
        let package = ProjectLoader::package_name(root)?;
        let edges = render(&raw, &package, &self.opts, &self.render_tasks);
        info!(
            "{}: {} rendered edge(s) ({} algorithm)",
            root.display(),
            edges.len(),
            self.algorithm
        );
        Ok(to_call_graph(&edges))
    }
}

/// Totals of one [`Pipeline::run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    pub test_paths: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub diffs: Vec<Diff>,
    pub report: InstrumentReport,
}

pub struct Pipeline<'a> {
    pub config: &'a Config,
    pub mutator: &'a dyn MutationEngine,
    pub runner: &'a dyn TestRunner,
    analyzer: AnalyzeUsecase,
    tasks: TaskGroup,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, mutator: &'a dyn MutationEngine, runner: &'a dyn TestRunner) -> Result<Self> {
        Ok(Self {
            config,
            mutator,
            runner,
            analyzer: AnalyzeUsecase::new(config)?,
            tasks: TaskGroup::new(config.analysis.workers)?,
        })
    }

    /// Diff every test path of `input` (up to the configured threshold of
    /// successes) and write the instrumented baseline to `output`.
    pub fn run(&self, input: &Path, output: &Path) -> Result<RunSummary> {
        let test_paths = ProjectLoader::find_test_paths(input)?;
        if test_paths.is_empty() {
            bail!("no test paths found under {}", input.display());
        }
        info!("Found {} test path(s) under {}", test_paths.len(), input.display());

        let mut summary = RunSummary {
            test_paths: test_paths.len(),
            ..RunSummary::default()
        };
        let mut diffs = Vec::new();
        for test_path in &test_paths {
            if summary.succeeded >= self.config.analysis.threshold {
                info!("Reached the threshold of {} test path(s)", self.config.analysis.threshold);
                break;
            }
            match self.generate_diff(input, test_path) {
                Ok(found) => {
                    info!("{}: {} diff(s)", test_path.display(), found.len());
                    diffs.extend(found);
                    summary.succeeded += 1;
                }
                Err(e) => {
                    warn!("PartialTestFailure {}: {:#}", test_path.display(), e);
                    summary.failed += 1;
                }
            }
        }
        if summary.succeeded == 0 {
            bail!("all {} test path(s) failed", summary.test_paths);
        }

        summary.diffs = dedup_diff(diffs);
        summary.report = self.diff_log(input, output, &summary.diffs)?;
        Ok(summary)
    }

    /// Diffs between the baseline crate and a variant mutated for
    /// `test_path`.
    pub fn generate_diff(&self, input: &Path, test_path: &Path) -> Result<Vec<Diff>> {
        let parent = input.parent().unwrap_or_else(|| Path::new("."));
        let work = WorkDir::create(parent.join(&self.config.analysis.work_dir_name))?;
        let mutated = work.path().join("mutated");
        let collector = if self.config.analysis.dynamic {
            Some(Collector::start(&self.config.collector.addr)?)
        } else {
            None
        };
        let collector = collector.as_ref();
        let work_dir = work.path();

        let tasks: Vec<Task<'_, CallGraph, anyhow::Error>> = vec![
            Box::new(move || self.variant_graph(input, test_path, 0, collector, work_dir)),
            Box::new(|| {
                self.mutator
                    .mutate(input, &mutated, test_path, &self.config.mutation.rules)
                    .with_context(|| format!("Mutation of {} failed", input.display()))?;
                let mutated_test = ProjectLoader::rebase(test_path, input, &mutated)?;
                self.variant_graph(&mutated, &mutated_test, 1, collector, work_dir)
            }),
        ];
        let mut graphs = self.tasks.run_batch(tasks)?.into_iter();
        let (Some(baseline), Some(variant)) = (graphs.next(), graphs.next()) else {
            bail!("graph generation returned no result");
        };

        let package = ProjectLoader::package_name(input)?;
        Ok(compare(&baseline, &variant, &package, input))
    }

    fn variant_graph(
        &self,
        root: &Path,
        test_path: &Path,
        run: u32,
        collector: Option<&Collector>,
        work: &Path,
    ) -> Result<CallGraph> {
        let mut graph = self.analyzer.graph(root, &[test_path.to_path_buf()])?;
        let Some(collector) = collector else {
            return Ok(graph);
        };

        let probed = work.join(format!("probed_{}", run));
        insert_collector(root, &probed, run, &self.config.probe.runtime)?;
        let probed_test = ProjectLoader::rebase(test_path, root, &probed)?;
        let addr = collector.local_addr().to_string();
        if !self.runner.run_tests(&probed, &probed_test, &addr)? {
            warn!("{}: tests failed, keeping the partial trace", probed_test.display());
        }
        let observed = collector.take(run)?;
        let added = graph.merge(&observed);
        info!("run {}: {} dynamic edge(s) merged", run, added);
        Ok(graph)
    }

    /// Instrument the divergent call sites of `input` and write the whole
    /// crate to `output`.
    pub fn diff_log(&self, input: &Path, output: &Path, diffs: &[Diff]) -> Result<InstrumentReport> {
        let mut tree = ProjectLoader::load_package(input)?;
        let mut ctx = InjectionContext::new(&tree.root, &tree.package, &self.config.probe)
            .context("Invalid probe configuration")?;
        let report = instrument_units(&mut ctx, &mut tree, diffs);
        tree.write_to(output)?;
        ProjectLoader::ensure_dependency(&output.join("Cargo.toml"), &self.config.probe.dependency)?;
        info!(
            "Wrote {} with {} probe(s) for {} diff(s)",
            output.display(),
            report.inserted(),
            diffs.len()
        );
        Ok(report)
    }
}

/// Copy `input` to `output` with a collector probe at the top of every
/// function body. Returns the number of probes.
pub fn insert_collector(input: &Path, output: &Path, run: u32, runtime: &DependencySpec) -> Result<usize> {
    let mut tree = ProjectLoader::load_package(input)?;
    let inserted = insert_collector_tree(&mut tree, run, &runtime.name);
    tree.write_to(output)?;
    ProjectLoader::ensure_dependency(&output.join("Cargo.toml"), runtime)?;
    info!("{}: {} collector probe(s) for run {}", output.display(), inserted, run);
    Ok(inserted)
}

/// Scratch directory, emptied on creation and removed on drop.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            fs::remove_dir_all(&path).with_context(|| format!("Failed to clear {}", path.display()))?;
        }
        fs::create_dir_all(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}
