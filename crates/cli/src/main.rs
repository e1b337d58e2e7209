//! Entry point for the `windflow` binary.
//!
//! `windflow run` starts one pipeline against a case directory, mirrors the
//! run's live event stream to stdout and turns Ctrl-C into a stop request.
//! `windflow runs` lists what the run recorder has stored.

mod cli;
mod logging;
mod output;

use clap::Parser;
use cli::{Cli, Command, RunArgs};
use color_eyre::eyre::{Result, WrapErr};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, info};
use wf_core::config::loader::load_config;
use wf_core::config::models::AppConfig;
use wf_core::recorder::JsonRunRecorder;
use wf_core::{generate_run_id, Orchestrator, StartRequest};
use wf_protocol::{LogEvent, RunSettings, RunStatus, REPLAY_COMPLETE_LINE};

/// Exit code for a run ended by a stop request.
const STOPPED_EXIT: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);

    let config = load_config(&cli.config)?;
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Runs => list_runs(&config).await,
    }
}

async fn run(config: AppConfig, args: RunArgs) -> Result<ExitCode> {
    let settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => RunSettings::default(),
    };
    let run_id = args.run_id.clone().unwrap_or_else(|| {
        let name = args.name.clone().unwrap_or_else(|| {
            args.case
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "run".to_string())
        });
        generate_run_id(&name)
    });

    let orchestrator = Orchestrator::new(config);
    // Subscribe before starting so no live event is missed. Anything replayed
    // before the sentinel belongs to an earlier run with the same id.
    let (subscriber, mut rx) = orchestrator.subscribe(&run_id).await;
    let mut replaying = true;

    orchestrator
        .start(StartRequest {
            run_id: run_id.clone(),
            kind: args.pipeline.into(),
            case_dir: args.case.clone(),
            settings,
        })
        .await?;
    info!(run_id = %run_id, case = %args.case.display(), "run started");

    let wait = orchestrator.wait(&run_id);
    tokio::pin!(wait);
    let mut stopping = false;

    let run = loop {
        tokio::select! {
            run = &mut wait => break run?,
            Some(frame) = rx.recv() => print_frame(&frame, &mut replaying),
            signal = tokio::signal::ctrl_c(), if !stopping => {
                signal.wrap_err("failed to listen for Ctrl-C")?;
                stopping = true;
                eprintln!("Stopping {run_id}...");
                orchestrator.stop(&run_id).await?;
            }
        }
    };
    while let Ok(frame) = rx.try_recv() {
        print_frame(&frame, &mut replaying);
    }
    orchestrator.detach(&run_id, subscriber).await;

    println!("{}", output::run_summary(&run));
    Ok(match run.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Stopped => ExitCode::from(STOPPED_EXIT),
        _ => ExitCode::FAILURE,
    })
}

fn print_frame(frame: &str, replaying: &mut bool) {
    if *replaying {
        if matches!(LogEvent::from_frame(frame), Ok(LogEvent::Log { line }) if line == REPLAY_COMPLETE_LINE)
        {
            *replaying = false;
        }
        return;
    }
    if let Some(text) = output::render_frame(frame) {
        println!("{text}");
    }
}

/// Read run settings from a `.json` file, or TOML otherwise.
fn load_settings(path: &Path) -> Result<RunSettings> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read settings file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let settings = if is_json {
        serde_json::from_str(&content)
            .wrap_err_with(|| format!("invalid JSON settings in {}", path.display()))?
    } else {
        toml::from_str(&content)
            .wrap_err_with(|| format!("invalid TOML settings in {}", path.display()))?
    };
    Ok(settings)
}

async fn list_runs(config: &AppConfig) -> Result<ExitCode> {
    let records = JsonRunRecorder::new(&config.metadata_dir).list().await?;
    println!("{}", output::runs_table(&records));
    Ok(ExitCode::SUCCESS)
}
