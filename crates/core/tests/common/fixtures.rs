//! Test fixtures for configuration, case directories and scripted stages.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use wf_core::config::models::AppConfig;
use wf_core::configurator::dictionary::foam_file;
use wf_core::engine::{StageContext, StageOutcome, StageStep};
use wf_core::exec::{CommandRequest, LineSink, ProcessRunner};
use wf_protocol::RunSettings;

/// Configuration rooted in `root`, with no toolkit environment to source.
#[allow(dead_code)]
pub fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        toolkit_env: String::new(),
        stop_grace_seconds: 1,
        ..AppConfig::default()
    }
    .resolve_paths(root)
}

/// A case directory with the dictionaries the solve pipeline edits.
#[allow(dead_code)]
pub fn write_case(root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(root.join("system"))?;
    std::fs::create_dir_all(root.join("constant"))?;
    std::fs::write(
        root.join("system/controlDict"),
        foam_file(
            "controlDict",
            "application     icoFoam;\nendTime         1;\ndeltaT          0.001;\n",
        ),
    )?;
    std::fs::write(
        root.join("system/fvSolution"),
        foam_file("fvSolution", "PIMPLE\n{\n    nCorrectors     2;\n}\n"),
    )?;
    std::fs::write(
        root.join("constant/transportProperties"),
        foam_file("transportProperties", "nu              1e-05;\n"),
    )
}

/// A converted mesh under `dir/constant/polyMesh`.
#[allow(dead_code)]
pub fn write_poly_mesh(dir: &Path) -> std::io::Result<()> {
    let poly = dir.join("constant/polyMesh");
    std::fs::create_dir_all(&poly)?;
    for name in ["points", "faces", "owner", "boundary"] {
        std::fs::write(poly.join(name), format!("{name}\n"))?;
    }
    Ok(())
}

/// Stage context for driving a StagePipeline directly.
#[allow(dead_code)]
pub fn stage_context(
    run_id: &str,
    case_dir: &Path,
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn LineSink>,
) -> StageContext {
    StageContext {
        run_id: run_id.to_string(),
        case_dir: case_dir.to_path_buf(),
        logs_dir: case_dir.join("stage-logs"),
        settings: Arc::new(RunSettings::default()),
        runner,
        sink,
        fatal_marker: "FOAM FATAL ERROR".to_string(),
    }
}

/// In-process stage that emits fixed lines, then reports a fixed outcome.
#[allow(dead_code)]
pub struct ScriptedStage {
    pub lines: Vec<String>,
    pub outcome: StageOutcome,
}

#[allow(dead_code)]
impl ScriptedStage {
    pub fn succeeding(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            outcome: StageOutcome::success(""),
        }
    }

    pub fn failing(lines: &[&str], message: &str) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            outcome: StageOutcome::failure(message),
        }
    }
}

#[async_trait]
impl StageStep for ScriptedStage {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        for line in &self.lines {
            ctx.log(line).await;
        }
        Ok(self.outcome.clone())
    }
}

/// Stage that runs one shell command through the context's runner.
#[allow(dead_code)]
pub struct CommandStage {
    pub command_line: String,
}

#[async_trait]
impl StageStep for CommandStage {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let request: CommandRequest =
            ctx.command("command", self.command_line.as_str(), &ctx.case_dir, "command.log");
        let output = ctx.execute(&request).await;
        Ok(if output.success() {
            StageOutcome::success("")
        } else {
            StageOutcome::failure(output.failure_message("command"))
        })
    }
}

/// Stage whose step function returns an error.
#[allow(dead_code)]
pub struct ErroringStage;

#[async_trait]
impl StageStep for ErroringStage {
    async fn run(&self, _ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        Err(anyhow::anyhow!("template missing").context("preparing case"))
    }
}
