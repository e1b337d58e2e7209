//! Cell zone setup with `topoSet`.

use super::log_name;
use crate::configurator::dictionary::foam_file;
use crate::engine::{StageContext, StageOutcome, StageStep};
use crate::error::WorkflowError;
use anyhow::Context;
use async_trait::async_trait;
use std::fmt::Write as _;
use wf_protocol::CellZoneSpec;

/// Writes `system/topoSetDict` for the requested cell zones and runs
/// `topoSet`.
///
/// `topoSet` may exit non-zero after creating every zone (for instance when
/// an unrelated set is empty); the stage therefore succeeds when every
/// requested zone name appears in the output. Otherwise the same actions are
/// replayed through `setSet -batch` before the stage gives up.
pub struct CreateCellZones {
    seq: usize,
}

impl CreateCellZones {
    pub fn new(seq: usize) -> Self {
        Self { seq }
    }
}

#[async_trait]
impl StageStep for CreateCellZones {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let zones = &ctx.settings.mesh.cell_zones;
        let solve_dir = ctx.solve_dir();
        let system = solve_dir.join("system");
        if !system.is_dir() {
            let err = WorkflowError::MissingPrecondition(format!(
                "no system directory in {}",
                solve_dir.display()
            ));
            return Ok(StageOutcome::failure(err.to_string()));
        }

        let dict_path = system.join("topoSetDict");
        tokio::fs::write(&dict_path, topo_set_dict(zones))
            .await
            .with_context(|| format!("writing {}", dict_path.display()))?;
        ctx.log(format!(
            "[topoSet] Wrote {} action(s) to {}",
            zones.len() * 2,
            dict_path.display()
        ))
        .await;

        let mut request = ctx.command(
            "topoSet",
            "topoSet",
            &solve_dir,
            &log_name(self.seq, "topoSet"),
        );
        for zone in zones {
            request = request.watch(zone.name.as_str());
        }
        let output = ctx.execute(&request).await;

        let names: Vec<&str> = zones.iter().map(|z| z.name.as_str()).collect();
        if output.success() {
            return Ok(StageOutcome::success(format!(
                "Created cell zones: {}",
                names.join(", ")
            )));
        }
        if output.spawn_error.is_none()
            && !output.cancelled
            && names.iter().all(|n| output.saw(n))
        {
            return Ok(StageOutcome::success(format!(
                "topoSet exited with code {} but created all zones: {}",
                output.exit_code.unwrap_or(-1),
                names.join(", ")
            )));
        }
        if output.cancelled {
            return Ok(StageOutcome::failure(output.failure_message("topoSet")));
        }

        let batch_path = system.join(SET_SET_BATCH);
        tokio::fs::write(&batch_path, set_set_batch(zones))
            .await
            .with_context(|| format!("writing {}", batch_path.display()))?;
        ctx.log("[topoSet] topoSet did not create every zone, retrying with setSet")
            .await;
        let fallback = ctx
            .execute(&ctx.command(
                "setSet",
                format!("setSet -batch system/{SET_SET_BATCH}"),
                &solve_dir,
                &log_name(self.seq, "setSet"),
            ))
            .await;
        if fallback.success() {
            return Ok(StageOutcome::success(format!(
                "Created cell zones (via setSet): {}",
                names.join(", ")
            )));
        }
        Ok(StageOutcome::failure(format!(
            "{}; {}",
            output.failure_message("topoSet"),
            fallback.failure_message("setSet")
        )))
    }
}

/// Batch file for the `setSet` fallback, inside `system/`.
pub const SET_SET_BATCH: &str = "setSet.batch";

/// `setSet` commands equivalent to [`topo_set_dict`].
pub fn set_set_batch(zones: &[CellZoneSpec]) -> String {
    let mut batch = String::new();
    for zone in zones {
        let _ = writeln!(
            batch,
            "cellSet {name} new zoneToCell {source}",
            name = zone.name,
            source = zone.source()
        );
        let _ = writeln!(
            batch,
            "cellZoneSet {name} new setToCellZone {name}",
            name = zone.name
        );
    }
    batch.push_str("quit\n");
    batch
}

/// `topoSetDict` with one cellSet and one cellZoneSet action per zone.
pub fn topo_set_dict(zones: &[CellZoneSpec]) -> String {
    let mut body = String::from("actions\n(\n");
    for zone in zones {
        let _ = write!(
            body,
            "    {{\n        name    {name};\n        type    cellSet;\n        action  new;\n        source  zoneToCell;\n        zone    {source};\n    }}\n",
            name = zone.name,
            source = zone.source(),
        );
        let _ = write!(
            body,
            "    {{\n        name    {name};\n        type    cellZoneSet;\n        action  new;\n        source  setToCellZone;\n        set     {name};\n    }}\n",
            name = zone.name,
        );
    }
    body.push_str(");\n");
    foam_file("topoSetDict", &body)
}
