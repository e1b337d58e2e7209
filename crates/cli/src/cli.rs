//! Command-line arguments.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use wf_core::config::loader::CONFIG_FILE;
use wf_protocol::PipelineKind;

#[derive(Parser, Debug)]
#[command(name = "windflow", version, about = "Run and supervise simulation case pipelines")]
pub struct Cli {
    /// Log verbosity (overrides WINDFLOW_LOG).
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a pipeline against a case directory and stream its log.
    Run(RunArgs),

    /// List recorded runs.
    Runs,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Case directory to operate on.
    #[arg(long)]
    pub case: PathBuf,

    /// Pipeline variant to execute.
    #[arg(long, value_enum, default_value_t = PipelineArg::Full)]
    pub pipeline: PipelineArg,

    /// Run settings as a JSON or TOML file.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Explicit run id. Generated from --name (or the case name) if omitted.
    #[arg(long)]
    pub run_id: Option<String>,

    /// Human-readable name used when generating the run id.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineArg {
    Mesh,
    Solve,
    Full,
}

impl From<PipelineArg> for PipelineKind {
    fn from(arg: PipelineArg) -> Self {
        match arg {
            PipelineArg::Mesh => PipelineKind::Mesh,
            PipelineArg::Solve => PipelineKind::Solve,
            PipelineArg::Full => PipelineKind::Full,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
