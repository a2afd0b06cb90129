//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::compiler::{CompiledArtifact, compile};
use crate::domain::document::StrategyDocument;
use crate::domain::error::StratrunError;
use crate::domain::validator::{ValidationResult, validate};
use crate::orchestrator::{Orchestrator, RunConfig};
use crate::ports::config_port::ConfigPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(
    name = "stratrun",
    about = "Compile, validate and backtest declarative trading strategies"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a full backtest and emit the result as JSON
    Backtest {
        /// INI run configuration
        #[arg(short, long)]
        config: PathBuf,
        /// Strategy document (JSON)
        #[arg(short, long)]
        strategy: PathBuf,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the compiled program text
    Compile {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Compile and run the safety validator without touching any data
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            strategy,
            output,
        } => run_backtest(&config, &strategy, output.as_deref()),
        Command::Compile { strategy } => run_compile(&strategy),
        Command::Validate { strategy } => run_validate(&strategy),
    }
}

fn fail(err: &StratrunError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

pub fn load_document(path: &Path) -> Result<StrategyDocument, StratrunError> {
    let content = fs::read_to_string(path)?;
    StrategyDocument::from_json(&content)
}

fn load_artifact(path: &Path) -> Result<CompiledArtifact, StratrunError> {
    let document = load_document(path)?;
    Ok(compile(&document)?)
}

fn run_backtest(config_path: &Path, strategy_path: &Path, output: Option<&Path>) -> ExitCode {
    info!(config = %config_path.display(), "loading config");
    let adapter = match FileConfigAdapter::from_file(config_path) {
        Ok(a) => a,
        Err(e) => return fail(&e),
    };
    let run_config = match RunConfig::from_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let data_dir = adapter.get_string("data", "dir").unwrap_or_default();
    let pretty = adapter.get_bool("report", "pretty", true);

    info!(strategy = %strategy_path.display(), "loading strategy");
    let document = match load_document(strategy_path) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };

    let data = CsvAdapter::new(PathBuf::from(data_dir.trim()));
    let result = Orchestrator::new(&data, &data, run_config).run(&document);

    let report = JsonReportAdapter::new(pretty);
    let written = match output {
        Some(path) => report.write(&result, path).map(|()| {
            info!(output = %path.display(), "result written");
        }),
        None => report.render(&result).map(|json| println!("{json}")),
    };
    if let Err(e) = written {
        return fail(&e);
    }

    if let Some(err) = &result.error {
        eprintln!("error: {}", err.message);
    }
    for violation in &result.violations {
        eprintln!("  {violation}");
    }
    ExitCode::from(result.exit_code())
}

fn run_compile(strategy_path: &Path) -> ExitCode {
    match load_artifact(strategy_path) {
        Ok(artifact) => {
            print!("{}", artifact.source());
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_validate(strategy_path: &Path) -> ExitCode {
    let artifact = match load_artifact(strategy_path) {
        Ok(a) => a,
        Err(e) => return fail(&e),
    };
    match validate(&artifact) {
        ValidationResult::Pass => {
            println!(
                "Program is valid: {} series, {} entry condition(s), {} exit rule(s)",
                artifact.program().series.len(),
                artifact.program().entry.len(),
                artifact.program().exits.len()
            );
            ExitCode::SUCCESS
        }
        ValidationResult::Rejected(violations) => {
            for violation in &violations {
                eprintln!("  {violation}");
            }
            fail(&StratrunError::Rejected {
                count: violations.len(),
            })
        }
    }
}
