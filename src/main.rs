// Command-line entry point for difftrace.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use difftrace::api::server::Collector;
use difftrace::application::{insert_collector, AnalyzeUsecase, Pipeline};
use difftrace::common::config::{Config, DEFAULT_CONFIG_FILE};
use difftrace::domain::inject::InjectionOutcome;
use difftrace::infrastructure::concurrency::init_thread_pool;
use difftrace::infrastructure::mutation::CommandMutationEngine;
use difftrace::infrastructure::project_loader::ProjectLoader;
use difftrace::infrastructure::test_runner::CargoTestRunner;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diff every test path and write the instrumented crate
    Instrument {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the rendered call graph as JSON
    Graph {
        #[arg(short, long)]
        input: PathBuf,
        /// Test file whose tests are the roots
        #[arg(long)]
        test: Option<PathBuf>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the diffs for one test path as JSON
    Diff {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        test: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Copy a crate with a collector probe in every function
    Collect {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        run: u32,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a standalone collector until killed
    Listen {
        /// Defaults to [collector] addr
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Config file (defaults to difftrace.toml in the working directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Call graph algorithm (static, cha, rta, pointer)
    #[arg(long)]
    algo: Option<String>,
    /// Include test code and use tests as roots
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    tests: Option<bool>,

    /// Comma-separated module prefixes to focus on
    #[arg(long)]
    focus: Option<String>,
    /// Grouping: pkg or type
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    limit: Option<String>,
    #[arg(long)]
    ignore: Option<String>,
    #[arg(long)]
    include: Option<String>,
    /// Drop standard library callees
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    nostd: Option<bool>,
    /// Drop calls to non-public callees
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    nointer: Option<bool>,

    /// Stop after this many successful test paths
    #[arg(long)]
    threshold: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    /// Merge dynamically collected traces into the static graphs
    #[arg(long)]
    dynamic: bool,
    /// Mutation engine executable
    #[arg(long)]
    mutator: Option<String>,
}

impl CommonArgs {
    fn load(&self) -> Result<Config> {
        let mut config = load_config(self.config.as_deref())?;
        let analysis = &mut config.analysis;
        if let Some(algo) = &self.algo {
            analysis.algorithm = algo.clone();
        }
        if let Some(tests) = self.tests {
            analysis.tests = tests;
        }
        if let Some(threshold) = self.threshold {
            analysis.threshold = threshold;
        }
        if let Some(workers) = self.workers {
            analysis.workers = workers;
        }
        analysis.dynamic |= self.dynamic;

        let render = &mut config.render;
        for (field, value) in [
            (&mut render.focus, &self.focus),
            (&mut render.group, &self.group),
            (&mut render.limit, &self.limit),
            (&mut render.ignore, &self.ignore),
            (&mut render.include, &self.include),
        ] {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        if let Some(nostd) = self.nostd {
            render.nostd = nostd;
        }
        if let Some(nointer) = self.nointer {
            render.nointer = nointer;
        }

        if let Some(program) = &self.mutator {
            config.mutation.program = Some(program.clone());
        }
        Ok(config)
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if !path.exists() => bail!("config file {} does not exist", path.display()),
        Some(path) => Config::load(path),
        None => Config::load(Path::new(DEFAULT_CONFIG_FILE)),
    }
}

fn mutation_engine(config: &Config) -> Result<CommandMutationEngine> {
    let program = config
        .mutation
        .program
        .clone()
        .context("no mutation engine configured: pass --mutator or set [mutation] program")?;
    Ok(CommandMutationEngine::new(program, config.mutation.args.clone()))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    init_thread_pool()?;

    match cli.command {
        Command::Instrument { input, output, common } => {
            let config = common.load()?;
            let engine = mutation_engine(&config)?;
            let runner = CargoTestRunner::default();
            let pipeline = Pipeline::new(&config, &engine, &runner)?;
            let summary = pipeline.run(&input, &output)?;
            println!(
                "Instrumented {}: {} diff(s) from {}/{} test path(s), {} probe(s) inserted, {} already present",
                output.display(),
                summary.diffs.len(),
                summary.succeeded,
                summary.test_paths,
                summary.report.inserted(),
                summary.report.count(InjectionOutcome::AlreadyInstrumented)
            );
        }
        Command::Graph {
            input,
            test,
            output,
            common,
        } => {
            let config = common.load()?;
            let analyzer = AnalyzeUsecase::new(&config)?;
            let entries: Vec<PathBuf> = test.into_iter().collect();
            let graph = analyzer.graph(&input, &entries)?;
            let json = serde_json::to_string_pretty(&graph)?;
            match output {
                Some(path) => {
                    ProjectLoader::create_file(&path, json.as_bytes())?;
                    info!("Wrote {} edge(s) to {}", graph.edge_count(), path.display());
                }
                None => println!("{}", json),
            }
        }
        Command::Diff { input, test, common } => {
            let config = common.load()?;
            let engine = mutation_engine(&config)?;
            let runner = CargoTestRunner::default();
            let pipeline = Pipeline::new(&config, &engine, &runner)?;
            let diffs = pipeline.generate_diff(&input, &test)?;
            println!("{}", serde_json::to_string_pretty(&diffs)?);
        }
        Command::Collect {
            input,
            output,
            run,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let inserted = insert_collector(&input, &output, run, &config.probe.runtime)?;
            println!("Inserted {} collector probe(s) into {}", inserted, output.display());
        }
        Command::Listen { addr, config } => {
            let config = load_config(config.as_deref())?;
            let addr = addr.unwrap_or(config.collector.addr);
            let collector = Collector::start(&addr)?;
            println!("Collector listening on {}", collector.local_addr());
            collector.join()?;
        }
    }
    Ok(())
}
