//! The solver stage, serial or decomposed.

use super::log_name;
use crate::engine::{StageContext, StageOutcome, StageStep};
use async_trait::async_trait;
use tracing::info;

/// Runs the configured solver in the solve directory.
///
/// Parallel runs decompose the case, run the solver under `mpirun`, then
/// reconstruct. Reconstruction only happens after a successful solve.
pub struct Solve {
    seq: usize,
}

impl Solve {
    pub fn new(seq: usize) -> Self {
        Self { seq }
    }
}

#[async_trait]
impl StageStep for Solve {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let solver = &ctx.settings.solver;
        let dir = ctx.solve_dir();
        let name = solver.solver.as_str();

        if !solver.parallel {
            let request = ctx.command(name, name, &dir, &log_name(self.seq, name));
            let output = ctx.execute(&request).await;
            return Ok(if output.success() {
                StageOutcome::success(format!("{name} finished"))
            } else {
                StageOutcome::failure(output.failure_message(name))
            });
        }

        let cores = solver.num_cores.max(1);
        info!(run_id = %ctx.run_id, solver = name, cores, "running decomposed solve");
        let steps = [
            ("decomposePar", "decomposePar -force".to_string()),
            (name, format!("mpirun -np {cores} {name} -parallel")),
            ("reconstructPar", "reconstructPar".to_string()),
        ];
        for (what, command_line) in steps {
            let request = ctx.command(what, command_line, &dir, &log_name(self.seq, what));
            let output = ctx.execute(&request).await;
            if !output.success() {
                return Ok(StageOutcome::failure(output.failure_message(what)));
            }
        }
        Ok(StageOutcome::success(format!(
            "{name} finished on {cores} cores"
        )))
    }
}
