//! `prh`: repeat a test suite, parse its timing logs, report statistics.
#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use prh::config::{CliOverrides, DEFAULT_RESULTS_DIR, HarnessConfig, MAX_ITERATIONS};
use prh::parse::{ArtifactStatus, LogParser};
use prh::report::{ReportPaths, ReportWriter};
use prh::session::{Session, collect_existing};
use prh::{LogConfig, LogFormat, init_logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

/// Exit status when the session finished but produced no records.
const NO_RESULTS_EXIT: u8 = 2;

#[derive(Parser)]
#[command(
    name = "prh",
    version,
    about = "Run a test suite repeatedly and aggregate its timing logs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format (pretty, compact or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the command N times and report on its timing logs
    Run(RunArgs),

    /// Parse one artifact and print its records
    Parse {
        /// Artifact to parse
        artifact: PathBuf,

        /// Iteration to attribute records to (defaults to the file name's index)
        #[arg(long)]
        iteration: Option<u32>,

        /// Output format (json or pretty)
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Re-aggregate existing run_*.log artifacts without running anything
    Analyze {
        /// Directory holding the artifacts
        artifacts_dir: PathBuf,

        /// Where to write the report
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Number of iterations [default: 100]
    #[arg(
        short = 'n',
        long,
        value_parser = clap::value_parser!(u32).range(1..=MAX_ITERATIONS as i64)
    )]
    iterations: Option<u32>,

    /// Directory for per-iteration log artifacts (cleared at start)
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Directory for reports (cleared at start)
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Kill an iteration that runs longer than this, e.g. "90s" or "5m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Write an intermediate report every K iterations
    #[arg(long, value_name = "K")]
    checkpoint_every: Option<u32>,

    /// TOML config file
    #[arg(long, env = "PRH_CONFIG")]
    config: Option<PathBuf>,

    /// Command to run; `{artifact}` is replaced with the log path
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy)]
enum OutputFormat {
    Json,
    Pretty,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    if let Some(path) = cli.log_file {
        log_config = log_config.with_file(path);
    }
    let _logging_guards = init_logging(&log_config)?;

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Parse {
            artifact,
            iteration,
            format,
        } => {
            parse(artifact, iteration, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze {
            artifacts_dir,
            results_dir,
        } => analyze(artifacts_dir, results_dir),
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let overrides = CliOverrides {
        iterations: args.iterations,
        command: args.command,
        artifacts_dir: args.artifacts_dir,
        results_dir: args.results_dir,
        timeout: args.timeout,
        checkpoint_every: args.checkpoint_every,
    };

    let (config, env_errors) = HarnessConfig::resolve(args.config.as_deref(), overrides)
        .context("Failed to load configuration")?;
    for error in &env_errors {
        warn!(error = %error, "Ignoring invalid environment value");
    }
    config.log_sources();
    config.validate().context("Invalid configuration")?;

    let runner = config.runner()?;
    let session = Session::new(config.session_settings(), runner)?;
    session
        .prepare()
        .context("Failed to prepare artifact and results directories")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C; running to completion");
            std::future::pending::<()>().await;
        }
    };

    let outcome = session
        .run(shutdown)
        .await
        .context("Failed to write final report")?;

    print_paths(&outcome.report);
    Ok(exit_for(outcome.has_results()))
}

fn parse(artifact: PathBuf, iteration: Option<u32>, format: OutputFormat) -> Result<()> {
    let parser = LogParser::new().context("Failed to build log grammar")?;
    let parsed = match iteration {
        Some(i) => parser.parse_artifact_as(&artifact, i),
        None => parser.parse_artifact(&artifact),
    };

    match &parsed.status {
        ArtifactStatus::Parsed => {}
        ArtifactStatus::Missing => bail!("Artifact not found: {}", artifact.display()),
        ArtifactStatus::Unreadable(e) => bail!("Cannot read {}: {e}", artifact.display()),
        ArtifactStatus::UnknownIteration => {
            bail!(
                "No iteration index in {}; pass --iteration",
                artifact.display()
            )
        }
    }

    let output = match format {
        OutputFormat::Json => serde_json::to_string(&parsed.outcome)?,
        OutputFormat::Pretty => serde_json::to_string_pretty(&parsed.outcome)?,
    };
    println!("{}", output);
    Ok(())
}

fn analyze(artifacts_dir: PathBuf, results_dir: PathBuf) -> Result<ExitCode> {
    let parser = LogParser::new().context("Failed to build log grammar")?;
    let (records, accounting) = collect_existing(&parser, &artifacts_dir)?;

    let paths = ReportWriter::new(results_dir)
        .write(records.as_slice(), &accounting)
        .context("Failed to write report")?;
    info!(
        records = records.len(),
        artifacts = accounting.completed,
        "Analysis complete"
    );

    print_paths(&paths);
    Ok(exit_for(!records.is_empty()))
}

fn print_paths(paths: &ReportPaths) {
    println!("Report: {}", paths.text.display());
    if let Some(raw) = &paths.raw_csv {
        println!("Raw data: {}", raw.display());
    }
    if let Some(summary) = &paths.summary_json {
        println!("Summary: {}", summary.display());
    }
}

fn exit_for(has_results: bool) -> ExitCode {
    if has_results {
        ExitCode::SUCCESS
    } else {
        eprintln!("No valid results: no iteration produced a parseable test case");
        ExitCode::from(NO_RESULTS_EXIT)
    }
}
