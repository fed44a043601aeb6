use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kira_align_pipeline::app::{App, RunReport};
use kira_align_pipeline::config::{ConfigLoader, RunConfig, RunOptions};
use kira_align_pipeline::engine::{SystemToolchain, ToolStatus};
use kira_align_pipeline::error::PipelineError;
use kira_align_pipeline::output::{ConsoleOutput, JsonOutput, OutputMode};
use kira_align_pipeline::prompt::{NoPrompt, StdinPrompt};

const PARTIAL_FAILURE_EXIT_CODE: u8 = 4;

#[derive(Parser)]
#[command(name = "kira-align")]
#[command(about = "Align, sort, mark duplicates, merge and index barcoded FASTQ runs")]
#[command(version, author)]
struct Cli {
    /// Directory holding the project directories
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Process a single project
    #[arg(short, long, conflicts_with = "all")]
    project: Option<String>,

    /// Process every project under the base directory
    #[arg(long)]
    all: bool,

    /// Threads handed to every engine call
    #[arg(short, long, allow_hyphen_values = true)]
    threads: Option<String>,

    /// Reference genome used for every project instead of <project>/ref.fasta
    #[arg(short, long)]
    reference: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds any single engine invocation may run
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    non_interactive: bool,

    /// Exit with status 4 when any project or work unit failed
    #[arg(long)]
    strict: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<PipelineError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &PipelineError) -> u8 {
    if error.is_config() { 2 } else { 1 }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let file = ConfigLoader::resolve(cli.config.as_deref())?;
    let options = RunOptions {
        base_dir: cli.base_dir,
        project: cli.project,
        all: cli.all,
        threads: cli.threads,
        reference: cli.reference,
        timeout_secs: cli.timeout,
        strict: cli.strict,
    };
    let config = RunConfig::resolve(options, file)?;

    let toolchain = SystemToolchain::new(&config.engines, config.timeout);
    if let ToolStatus::Missing { message } = toolchain.tool_status() {
        warn!("{message}; affected work units will fail");
    }

    let app = App::new(toolchain);
    let run = app.start();
    run.install_interrupt_handler()?;

    let report = match output_mode {
        OutputMode::Interactive => {
            let report = run.execute(&config, &StdinPrompt, &ConsoleOutput)?;
            ConsoleOutput::print_run(&report);
            report
        }
        OutputMode::NonInteractive => {
            let report = run.execute(&config, &NoPrompt, &JsonOutput)?;
            JsonOutput::print_run(&report).into_diagnostic()?;
            report
        }
    };

    Ok(exit_code(&report, config.strict))
}

fn exit_code(report: &RunReport, strict: bool) -> ExitCode {
    if strict && report.has_failures() {
        ExitCode::from(PARTIAL_FAILURE_EXIT_CODE)
    } else {
        ExitCode::SUCCESS
    }
}
