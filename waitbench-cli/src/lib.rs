#![warn(missing_docs)]
//! Waitbench CLI Library
//!
//! Strategy runners, the process supervisor, the distributed pool, the
//! heartbeat launcher and the command line that ties them together.
//!
//! # Example
//!
//! ```ignore
//! use waitbench_cli::{Strategy, run_strategy};
//!
//! let timing = run_strategy(Strategy::ThreadPool, 10, 1.0, Some(4))?;
//! println!("{}", waitbench_cli::format_result_line(&timing));
//! ```

mod background;
mod config;
mod distributed;
mod error;
mod harness;
mod progress;
mod report;
mod strategy;
mod supervisor;

pub use background::{BackgroundProcessSet, ExecutionContext, HeartbeatConfig, Interrupt, InterruptKind};
pub use config::*;
pub use distributed::{DistributedPool, ObjectRef, ObjectResult};
pub use error::{FailureCause, RunError, TaskFailed};
pub use harness::{StrategyOutcome, run_all, run_benchmark, run_strategy, runner_for};
pub use progress::BarProgress;
pub use report::{
    BenchReport, OutputFormat, StrategyFailure, format_human_output, format_result_line,
    generate_json_report,
};
pub use strategy::{
    CooperativeRunner, DistributedRunner, ExecutionConfig, FailureMode, GatherStyle,
    ProcessPoolRunner, SequentialRunner, Strategy, StrategyRunner, ThreadPoolRunner,
    TimingResult, parse_strategies,
};
pub use supervisor::{Supervisor, SupervisorError, TaskOutcome, WorkerHandle};

use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use waitbench_core::{ProgressSink, WorkerMain};

/// Waitbench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "waitbench")]
#[command(author, version, about = "Waitbench - compare concurrency models on idle workloads")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Optional subcommand (Run, Heartbeat, Init); defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Run options when no subcommand is given
    #[command(flatten)]
    pub run: RunArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: Run as worker process (used by supervisor)
    #[arg(long = "wait-worker", hide = true)]
    pub wait_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Time a batch of waits under one or more strategies (default)
    Run(RunArgs),
    /// Run the heartbeat units until interrupted
    Heartbeat(HeartbeatArgs),
    /// Print a default waitbench.toml
    Init,
}

/// Options of `waitbench run`
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Strategy to run; repeat for several. One of sequential, cooperative,
    /// cooperative-list, thread-pool, process-pool, distributed, all
    #[arg(short, long = "strategy")]
    pub strategies: Vec<String>,

    /// Number of tasks
    #[arg(short = 'n', long)]
    pub tasks: Option<usize>,

    /// Wait per task (e.g., "1s", "250ms")
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Concurrency limit for the thread and process pools
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// CPU budget of the distributed pool
    #[arg(long)]
    pub cpus: Option<usize>,

    /// Distributed only: return after the first K completions
    #[arg(long)]
    pub await_count: Option<usize>,

    /// Cooperative failure policy: gather or first-failure
    #[arg(long)]
    pub mode: Option<String>,

    /// Log a line as each cooperative task finishes
    #[arg(long)]
    pub announce: bool,

    /// Show a progress bar per strategy
    #[arg(long)]
    pub progress: bool,

    /// Output format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Options of `waitbench heartbeat`
#[derive(Args, Debug, Default, Clone)]
pub struct HeartbeatArgs {
    /// Where the units run: thread, process or distributed
    #[arg(long)]
    pub context: Option<String>,

    /// CPU budget for the distributed context
    #[arg(long)]
    pub cpus: Option<usize>,

    /// Ticker interval (e.g., "1s")
    #[arg(long)]
    pub tick: Option<String>,

    /// Announcer interval (e.g., "5s")
    #[arg(long)]
    pub announce: Option<String>,

    /// Announcer text
    #[arg(long)]
    pub message: Option<String>,
}

/// Run the Waitbench CLI with the process arguments.
///
/// # Returns
/// Returns `Ok(())` on success, or an error if any strategy failed.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the Waitbench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Initialize logging; stdout is reserved for reports and heartbeats
    let filter = if cli.verbose {
        "waitbench=debug"
    } else {
        "waitbench=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Handle worker mode before touching configuration
    if cli.wait_worker {
        return run_worker_mode();
    }

    // Discover waitbench.toml configuration (CLI flags override)
    let config = WaitbenchConfig::discover().unwrap_or_default();

    match cli.command {
        Some(Commands::Run(ref args)) => run_benchmarks(args, &config),
        Some(Commands::Heartbeat(ref args)) => run_heartbeat(args, &config),
        Some(Commands::Init) => {
            print!("{}", WaitbenchConfig::default_toml());
            Ok(())
        }
        None => run_benchmarks(&cli.run, &config),
    }
}

/// Run as a worker process (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

/// Build an ExecutionConfig by layering: waitbench.toml defaults → CLI overrides.
fn build_execution_config(
    args: &RunArgs,
    config: &WaitbenchConfig,
) -> anyhow::Result<ExecutionConfig> {
    let task_count = args.tasks.unwrap_or(config.runner.task_count);
    let duration = match &args.duration {
        Some(d) => WaitbenchConfig::parse_duration(d)?,
        None => WaitbenchConfig::parse_duration(&config.runner.task_duration)?,
    };
    let mode = match &args.mode {
        Some(m) => m.parse()?,
        None => config.runner.mode,
    };

    let mut execution =
        ExecutionConfig::new(Strategy::Sequential, task_count, duration.as_secs_f64())
            .with_failure_mode(mode);
    execution.worker_count = args.workers.or(config.runner.workers);
    // The distributed pool always needs a budget; fall back to the machine's CPUs.
    execution.cpus = args
        .cpus
        .or(config.runner.cpus)
        .or(execution.worker_count)
        .or_else(|| std::thread::available_parallelism().map(|n| n.get()).ok());
    execution.await_count = args.await_count.or(config.runner.await_count);
    execution.announce = args.announce;
    Ok(execution)
}

fn run_benchmarks(args: &RunArgs, config: &WaitbenchConfig) -> anyhow::Result<()> {
    let base = build_execution_config(args, config)?;
    let strategies = if args.strategies.is_empty() {
        parse_strategies(&config.runner.strategies)?
    } else {
        parse_strategies(&args.strategies)?
    };
    let format: OutputFormat = match &args.format {
        Some(f) => f.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => config.output.format,
    };
    let show_progress = args.progress || config.runner.progress;

    tracing::debug!(
        strategies = strategies.len(),
        tasks = base.task_count,
        duration_secs = base.task_duration_secs,
        workers = ?base.worker_count,
        "starting comparison"
    );

    let outcomes = run_all(&strategies, &base, |strategy| {
        show_progress.then(|| Box::new(BarProgress::new(strategy.name())) as Box<dyn ProgressSink>)
    });
    let report = BenchReport::from_outcomes(base.task_count, base.task_duration_secs, &outcomes);
    let output = report.render(format)?;

    if let Some(ref path) = args.output {
        let mut file = std::fs::File::create(path)?;
        file.write_all(output.as_bytes())?;
        eprintln!("Report written to: {}", path.display());
    } else {
        print!("{}", output);
        std::io::stdout().flush()?;
    }

    if report.has_failures() {
        return Err(anyhow::anyhow!(
            "{} of {} strategies failed",
            report.failures.len(),
            strategies.len()
        ));
    }
    Ok(())
}

fn build_heartbeat_config(
    args: &HeartbeatArgs,
    config: &WaitbenchConfig,
) -> anyhow::Result<HeartbeatConfig> {
    let section = &config.heartbeat;
    let tick = args.tick.as_deref().unwrap_or(&section.tick_interval);
    let announce = args.announce.as_deref().unwrap_or(&section.announce_interval);
    let context = match &args.context {
        Some(c) => c.parse()?,
        None => section.context,
    };

    Ok(HeartbeatConfig {
        tick: WaitbenchConfig::parse_duration(tick)?,
        announce: WaitbenchConfig::parse_duration(announce)?,
        message: args.message.clone().unwrap_or_else(|| section.message.clone()),
        context,
        cpus: args.cpus.unwrap_or(section.cpus),
        worker_binary: None,
    })
}

fn run_heartbeat(args: &HeartbeatArgs, config: &WaitbenchConfig) -> anyhow::Result<()> {
    let heartbeat = build_heartbeat_config(args, config)?;
    tracing::info!(context = %heartbeat.context, "heartbeat running, press Ctrl-C to stop");
    BackgroundProcessSet::run_until_interrupted(&heartbeat)?;
    Ok(())
}
