//! Top-level CLI definition and dispatch.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::control;
use serde_json::{Value, json};
use thiserror::Error;

use silicon_debug_harness::bench::sim::{ContentScript, SimulatedBench};
use silicon_debug_harness::core::config::{BenchConfig, SweepDomain, SweepKind};
use silicon_debug_harness::core::errors::SdhError;
use silicon_debug_harness::core::recipe::{ConfigUpdates, Recipe, RecipeSet, SweepAxisSpec};
use silicon_debug_harness::exec::executor::BenchExecutor;
use silicon_debug_harness::exec::framework::Framework;
use silicon_debug_harness::exec::results::RunStats;
use silicon_debug_harness::logger::bench::{BenchLog, ConsoleLogger, LogLevel};
use silicon_debug_harness::logger::store::SqliteResultStore;

/// Silicon Debug Harness — loop/sweep/shmoo experiment runner for bench debug.
#[derive(Debug, Parser)]
#[command(
    name = "sdh",
    author,
    version,
    about = "Silicon Debug Harness - bench experiment runner",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Bench configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity (per-iteration debug detail).
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Mirror all log lines to this file, unstyled.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a fixed-configuration loop experiment.
    Loops(LoopsArgs),
    /// Run a one-axis frequency/voltage sweep.
    Sweep(SweepArgs),
    /// Run a two-axis shmoo from a definition file.
    Shmoo(ShmooArgs),
    /// Run recipes from a JSON file (single recipe or a batch).
    Run(RunArgs),
    /// View and validate configuration state.
    Config(ConfigArgs),
}

/// Knobs shared by every experiment subcommand.
#[derive(Debug, Clone, Args, Default)]
struct ExperimentArgs {
    /// Persist finished-run summaries to this SQLite database.
    #[arg(long, value_name = "PATH")]
    store: Option<PathBuf>,
    /// Simulated bench: fail every Nth iteration (0 = never).
    #[arg(long, default_value_t = 0, value_name = "N")]
    sim_fail_every: usize,
    /// Simulated bench: latency per bench operation.
    #[arg(long, default_value_t = 0, value_name = "MILLISECONDS")]
    sim_delay_ms: u64,
}

#[derive(Debug, Clone, Args)]
struct LoopsArgs {
    /// Number of iterations to run.
    #[arg(value_name = "COUNT")]
    iterations: usize,
    #[command(flatten)]
    experiment: ExperimentArgs,
}

#[derive(Debug, Clone, Args)]
struct SweepArgs {
    /// Swept knob: `frequency` or `voltage`.
    #[arg(long = "type", value_name = "KIND")]
    kind: String,
    /// Domain: `core` or `mesh` (aliases `ia` / `cfc`).
    #[arg(long, value_name = "DOMAIN")]
    domain: String,
    /// First swept value.
    #[arg(long, allow_negative_numbers = true)]
    start: f64,
    /// Last swept value (always included).
    #[arg(long, allow_negative_numbers = true)]
    end: f64,
    /// Step size.
    #[arg(long, value_name = "STEP")]
    steps: f64,
    #[command(flatten)]
    experiment: ExperimentArgs,
}

#[derive(Debug, Clone, Args)]
struct ShmooArgs {
    /// Shmoo definition file (JSON object of labelled definitions).
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    /// Label to run from the definition file.
    #[arg(long, value_name = "LABEL")]
    label: String,
    #[command(flatten)]
    experiment: ExperimentArgs,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Recipe file: one recipe object, or a batch mapping names to recipes.
    #[arg(value_name = "PATH")]
    recipe: PathBuf,
    /// Treat the file as a batch even if it parses as a single recipe.
    #[arg(long)]
    batch: bool,
    /// Experiment names to skip in a batch run.
    #[arg(long, value_delimiter = ',', value_name = "NAME")]
    skip: Vec<String>,
    #[command(flatten)]
    experiment: ExperimentArgs,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the effective merged configuration.
    Show,
    /// Validate the configuration file and exit.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Loops(args) => run_loops(cli, args),
        Command::Sweep(args) => run_sweep(cli, args),
        Command::Shmoo(args) => run_shmoo(cli, args),
        Command::Run(args) => run_recipes(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

// ──────────────────── shared plumbing ────────────────────

const fn output_mode(cli: &Cli) -> OutputMode {
    if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(payload)?);
    Ok(())
}

fn load_bench_config(cli: &Cli) -> Result<BenchConfig, CliError> {
    match &cli.config {
        Some(path) => BenchConfig::load(path).map_err(|e| CliError::User(e.to_string())),
        None => Ok(BenchConfig::default()),
    }
}

fn build_logger(cli: &Cli) -> Result<Arc<dyn BenchLog>, CliError> {
    let min_level = if cli.verbose {
        LogLevel::Debug
    } else if cli.quiet {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    Ok(match &cli.log_file {
        Some(path) => Arc::new(
            ConsoleLogger::with_file(min_level, path)
                .map_err(|e| CliError::Runtime(e.to_string()))?,
        ),
        None => Arc::new(ConsoleLogger::new(min_level)),
    })
}

fn build_framework(cli: &Cli, experiment: &ExperimentArgs) -> Result<Arc<Framework>, CliError> {
    let bench_config = load_bench_config(cli)?;
    let logger = build_logger(cli)?;
    let mut framework = Framework::new(logger, bench_config.framework.clone())
        .with_test_config(bench_config.test.clone())
        .with_boot_config(bench_config.boot.clone());
    if let Some(path) = &experiment.store {
        let store =
            SqliteResultStore::open(path).map_err(|e| CliError::Runtime(e.to_string()))?;
        framework = framework.with_result_sink(Box::new(store));
    }
    Ok(Arc::new(framework))
}

/// Content script for the simulated bench, long enough for any run.
const SIM_SCRIPT_LEN: usize = 4096;

fn build_bench(experiment: &ExperimentArgs) -> SimulatedBench {
    let mut bench = SimulatedBench::new();
    if experiment.sim_fail_every > 0 {
        let script = (1..=SIM_SCRIPT_LEN).map(|i| {
            if i % experiment.sim_fail_every == 0 {
                ContentScript::Fail
            } else {
                ContentScript::Pass
            }
        });
        bench = bench.with_content_script(script);
    }
    if experiment.sim_delay_ms > 0 {
        bench = bench.with_op_delay(Duration::from_millis(experiment.sim_delay_ms));
    }
    bench
}

/// Run the experiment closure on a worker thread while the main thread watches
/// for Ctrl-C: the first interrupt requests a graceful end, the second cancels.
fn drive_experiment<F>(framework: &Arc<Framework>, work: F) -> Result<Vec<String>, CliError>
where
    F: FnOnce() -> Result<Vec<String>, SdhError> + Send + 'static,
{
    let interrupt = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupt))?;

    let worker = thread::spawn(work);
    let mut interrupts = 0u32;
    while !worker.is_finished() {
        if interrupt.swap(false, Ordering::SeqCst) {
            interrupts += 1;
            if interrupts == 1 {
                eprintln!("interrupt: ending after the current iteration (Ctrl-C again to cancel)");
                framework.end_experiment();
            } else {
                framework.cancel_execution();
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    worker
        .join()
        .map_err(|_| CliError::Internal("experiment thread panicked".to_string()))?
        .map_err(|e| CliError::Runtime(e.to_string()))
}

fn report_run(
    cli: &Cli,
    command: &str,
    statuses: &[String],
    stats: &RunStats,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            println!("Statuses: {}", statuses.join(", "));
            println!(
                "Completed {} iterations: {} pass / {} fail ({}% pass rate)",
                stats.total_completed, stats.pass_count, stats.fail_count, stats.pass_rate,
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "statuses": statuses,
                "stats": stats,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── experiment commands ────────────────────

fn run_loops(cli: &Cli, args: &LoopsArgs) -> Result<(), CliError> {
    let framework = build_framework(cli, &args.experiment)?;
    let bench = build_bench(&args.experiment);
    let mut exec = BenchExecutor::new(bench, framework.cancel_token(), framework.logger());

    let iterations = args.iterations;
    let worker_framework = Arc::clone(&framework);
    let statuses = drive_experiment(&framework, move || {
        worker_framework.run_loops(&mut exec, iterations, &ConfigUpdates::default())
    })?;

    let stats = framework.get_execution_state().current_stats;
    report_run(cli, "loops", &statuses, &stats)
}

fn run_sweep(cli: &Cli, args: &SweepArgs) -> Result<(), CliError> {
    let spec = SweepAxisSpec {
        kind: SweepKind::parse(&args.kind).map_err(|e| CliError::User(e.to_string()))?,
        domain: SweepDomain::parse(&args.domain).map_err(|e| CliError::User(e.to_string()))?,
        start: args.start,
        end: args.end,
        step: args.steps,
    };

    let framework = build_framework(cli, &args.experiment)?;
    let bench = build_bench(&args.experiment);
    let mut exec = BenchExecutor::new(bench, framework.cancel_token(), framework.logger());

    let worker_framework = Arc::clone(&framework);
    let statuses = drive_experiment(&framework, move || {
        worker_framework.run_sweep(&mut exec, &spec, &ConfigUpdates::default())
    })?;

    let stats = framework.get_execution_state().current_stats;
    report_run(cli, "sweep", &statuses, &stats)
}

fn run_shmoo(cli: &Cli, args: &ShmooArgs) -> Result<(), CliError> {
    let framework = build_framework(cli, &args.experiment)?;
    let bench = build_bench(&args.experiment);
    let mut exec = BenchExecutor::new(bench, framework.cancel_token(), framework.logger());

    let file = args.file.clone();
    let label = args.label.clone();
    let worker_framework = Arc::clone(&framework);
    let statuses = drive_experiment(&framework, move || {
        worker_framework.run_shmoo(&mut exec, &file, &label, &ConfigUpdates::default())
    })?;

    let stats = framework.get_execution_state().current_stats;
    report_run(cli, "shmoo", &statuses, &stats)
}

fn run_recipes(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let framework = build_framework(cli, &args.experiment)?;
    let bench = build_bench(&args.experiment);
    let mut exec = BenchExecutor::new(bench, framework.cancel_token(), framework.logger());

    // A batch file is a JSON object of recipe objects; a single recipe is a
    // flat object. Try the single-recipe shape first unless --batch is given.
    if !args.batch {
        if let Ok(recipe) = Recipe::load(&args.recipe) {
            let worker_framework = Arc::clone(&framework);
            let statuses = drive_experiment(&framework, move || {
                worker_framework.run_recipe(&mut exec, &recipe)
            })?;
            let stats = framework.get_execution_state().current_stats;
            return report_run(cli, "run", &statuses, &stats);
        }
    }

    let set = RecipeSet::load(&args.recipe).map_err(|e| CliError::User(e.to_string()))?;
    let skip = args.skip.clone();
    let worker_framework = Arc::clone(&framework);
    let interrupt = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupt))?;

    let worker = thread::spawn(move || worker_framework.run_recipe_batch(&mut exec, &set, &skip));
    let mut interrupts = 0u32;
    while !worker.is_finished() {
        if interrupt.swap(false, Ordering::SeqCst) {
            interrupts += 1;
            if interrupts == 1 {
                eprintln!("interrupt: ending after the current iteration (Ctrl-C again to cancel)");
                framework.end_experiment();
            } else {
                framework.cancel_execution();
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    let outcomes = worker
        .join()
        .map_err(|_| CliError::Internal("experiment thread panicked".to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => {
            for (name, statuses) in &outcomes {
                if statuses.is_empty() {
                    println!("{name}: failed to run");
                } else {
                    println!("{name}: {}", statuses.join(", "));
                }
            }
        }
        OutputMode::Json => {
            let experiments: Vec<Value> = outcomes
                .iter()
                .map(|(name, statuses)| json!({ "name": name, "statuses": statuses }))
                .collect();
            write_json_line(&json!({ "command": "run", "experiments": experiments }))?;
        }
    }
    Ok(())
}

// ──────────────────── config command ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        None | Some(ConfigCommand::Show) => {
            let config = load_bench_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(e.to_string()))?;
                    print!("{rendered}");
                }
                OutputMode::Json => {
                    write_json_line(&serde_json::to_value(&config)?)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => {
            let path = cli
                .config
                .as_ref()
                .ok_or_else(|| CliError::User("--config is required for validate".to_string()))?;
            BenchConfig::load(path).map_err(|e| CliError::User(e.to_string()))?;
            match output_mode(cli) {
                OutputMode::Human => println!("{} is valid", path.display()),
                OutputMode::Json => write_json_line(&json!({
                    "command": "config validate",
                    "path": path.to_string_lossy(),
                    "valid": true,
                }))?,
            }
            Ok(())
        }
    }
}
