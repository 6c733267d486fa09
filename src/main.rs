use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use solver_farm::config::{RunnerConfig, SolverConfig};
use solver_farm::manifest::RunManifest;
use solver_farm::report::{ConsoleReporter, ProgressReporter};
use solver_farm::scheduler::{discover_jobs, Scheduler};
use solver_farm::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "solver-farm")]
#[command(version)]
#[command(about = "Run a directory of solver jobs with bounded parallelism")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run every job found in the work directory
    Run(RunArgs),

    /// List the jobs that would be run
    List {
        #[command(flatten)]
        jobs: JobArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct JobArgs {
    /// Directory containing the solver input files
    #[arg(long, short = 'd', default_value = "simulations")]
    dir: PathBuf,

    /// Suffix of input files; the rest of the file name is the job id
    #[arg(long, default_value = ".inp")]
    input_suffix: String,

    /// Suffix of the result archive a successful job produces
    #[arg(long, default_value = ".odb")]
    result_suffix: String,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    jobs: JobArgs,

    /// Maximum number of solver processes running at once
    #[arg(long, short = 'j', default_value = "8")]
    parallel: usize,

    /// Maximum time between two completion checks, in milliseconds
    #[arg(long, default_value = "15000")]
    poll_interval_ms: u64,

    /// Only detect completions on the poll interval, ignoring SIGCHLD
    #[arg(long)]
    poll_only: bool,

    /// Solver executable
    #[arg(long, default_value = "abaqus")]
    program: String,

    /// Solver argument template, repeatable. `{job}` is replaced by the job id,
    /// `{input}` by the input file name. Defaults to `job={job} interactive`.
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Extra environment for every solver process (KEY=VALUE), repeatable
    #[arg(long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Do not pass the default UTF-8 locale variables to solver processes
    #[arg(long)]
    no_default_env: bool,

    /// Manifest file name, written into the work directory after the run
    #[arg(long, default_value = "run_manifest.json")]
    manifest: String,

    /// Skip writing the manifest
    #[arg(long, conflicts_with = "manifest")]
    no_manifest: bool,

    /// Output format of the final report
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    input_file: String,
    has_result: bool,
}

#[derive(Serialize)]
struct JobListOutput {
    work_dir: String,
    jobs: Vec<JobListItem>,
    total_count: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: RunArgs) -> RunnerConfig {
    let defaults = SolverConfig::default();
    let mut solver = SolverConfig {
        program: args.program,
        args: if args.args.is_empty() {
            defaults.args
        } else {
            args.args
        },
        env: if args.no_default_env {
            Vec::new()
        } else {
            defaults.env
        },
    };
    solver.env.extend(args.env);

    RunnerConfig {
        work_dir: args.jobs.dir,
        parallelism: args.parallel,
        poll_interval_ms: args.poll_interval_ms,
        wake_on_child_exit: !args.poll_only,
        input_suffix: args.jobs.input_suffix,
        result_suffix: args.jobs.result_suffix,
        manifest_file: if args.no_manifest {
            None
        } else {
            Some(args.manifest)
        },
        solver,
        ..RunnerConfig::default()
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let output = args.output.clone();
    let config = build_config(args);

    let reporter: Arc<dyn ProgressReporter> = match output {
        OutputFormat::Json => Arc::new(ConsoleReporter::stderr()),
        OutputFormat::Table => Arc::new(ConsoleReporter::stdout()),
    };

    tracing::info!(
        work_dir = ?config.work_dir,
        parallelism = config.parallelism,
        program = %config.solver.program,
        poll_interval_ms = config.poll_interval_ms,
        "Starting solver run"
    );

    let shutdown = install_shutdown_handler()?;
    let scheduler = Scheduler::new(config, reporter)?.with_cancellation(shutdown);

    let report = match scheduler.run().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Hint: generate the solver input files before running.");
            std::process::exit(1);
        }
    };

    if report.summary.total == 0 && matches!(output, OutputFormat::Table) {
        println!(
            "No '{}' files found in {}.",
            scheduler.config().input_suffix,
            scheduler.config().work_dir.display()
        );
        return Ok(());
    }

    match output {
        OutputFormat::Json => {
            let manifest = RunManifest::new(scheduler.config(), &report);
            println!("{}", manifest.to_json()?);
        }
        OutputFormat::Table => {
            println!("{}", "-".repeat(50));
            println!(
                "--- All {} simulation jobs have been processed. ---",
                report.summary.total
            );
        }
    }

    if report.summary.interrupted || report.summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_list(jobs: JobArgs, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunnerConfig {
        work_dir: jobs.dir,
        input_suffix: jobs.input_suffix,
        result_suffix: jobs.result_suffix,
        ..RunnerConfig::default()
    };
    let found = discover_jobs(&config.work_dir, &config.input_suffix)?;

    let items: Vec<JobListItem> = found
        .into_iter()
        .map(|job| JobListItem {
            has_result: config.result_path(job.id.as_str()).is_file(),
            job_id: job.id.to_string(),
            input_file: job.input_file,
        })
        .collect();

    match output {
        OutputFormat::Json => {
            let output = JobListOutput {
                work_dir: config.work_dir.display().to_string(),
                total_count: items.len(),
                jobs: items,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<32} {:<36} RESULT", "JOB ID", "INPUT");
                println!("{}", "-".repeat(76));
                for item in &items {
                    let result = if item.has_result { "yes" } else { "-" };
                    println!("{:<32} {:<36} {}", item.job_id, item.input_file, result);
                }
                println!();
                println!("{} jobs in {}", items.len(), config.work_dir.display());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Commands::Run(run_args) => {
            handle_run(run_args).await?;
        }
        Commands::List { jobs, output } => {
            handle_list(jobs, &output)?;
        }
    }

    Ok(())
}
