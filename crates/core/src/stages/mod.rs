//! The toolkit stage library and the pipeline variant tables.
//!
//! Each stage is a small stateless struct implementing [`StageStep`]; a
//! pipeline variant is the ordered table [`build`] assembles from the run's
//! settings. Process-backed stages write numbered transcripts such as
//! `01_mesh_import.log` into the run's stage log directory.
//!
//! [`StageStep`]: crate::engine::StageStep

pub mod analysis;
pub mod check;
pub mod mesh;
pub mod settings;
pub mod solve;
pub mod zones;

#[cfg(test)]
pub(crate) mod testing;

use crate::configurator::CaseConfigurator;
use crate::engine::Stage;
use std::sync::Arc;
use wf_protocol::{PipelineKind, RunSettings};

pub use analysis::PostAnalysis;
pub use check::CheckMesh;
pub use mesh::{ImportMesh, MergeMesh};
pub use settings::ApplySettings;
pub use solve::Solve;
pub use zones::CreateCellZones;

/// Transcript file name for the `seq`-th stage of a table.
pub fn log_name(seq: usize, stem: &str) -> String {
    format!("{seq:02}_{stem}.log")
}

/// Build the stage table for `kind`.
pub fn build(
    kind: PipelineKind,
    settings: &RunSettings,
    configurator: Arc<dyn CaseConfigurator>,
) -> Vec<Stage> {
    let mut stages = Vec::new();
    if matches!(kind, PipelineKind::Mesh | PipelineKind::Full) {
        mesh_stages(settings, &mut stages);
    }
    if matches!(kind, PipelineKind::Solve | PipelineKind::Full) {
        solve_stages(settings, configurator, &mut stages);
    }
    stages
}

fn mesh_stages(settings: &RunSettings, stages: &mut Vec<Stage>) {
    let layout = &settings.mesh;
    if layout.regions.is_empty() {
        let seq = stages.len() + 1;
        stages.push(Stage::new("Import mesh", ImportMesh::new(None, seq)));
        return;
    }

    for region in &layout.regions {
        let seq = stages.len() + 1;
        stages.push(Stage::new(
            format!("Import mesh ({region})"),
            ImportMesh::new(Some(region.clone()), seq),
        ));
    }

    if let Some(master) = &layout.merge_into {
        for addition in layout.regions.iter().filter(|r| *r != master) {
            let seq = stages.len() + 1;
            stages.push(Stage::new(
                format!("Merge mesh ({addition})"),
                MergeMesh::new(master.clone(), addition.clone(), seq),
            ));
        }
    }
}

fn solve_stages(
    settings: &RunSettings,
    configurator: Arc<dyn CaseConfigurator>,
    stages: &mut Vec<Stage>,
) {
    if !settings.mesh.cell_zones.is_empty() {
        let seq = stages.len() + 1;
        stages.push(Stage::new("Create cell zones", CreateCellZones::new(seq)));
    }
    let seq = stages.len() + 1;
    stages.push(Stage::new("Check mesh", CheckMesh::new(seq)));
    stages.push(Stage::new("Apply settings", ApplySettings::new(configurator)));
    let seq = stages.len() + 1;
    stages.push(Stage::new("Run solver", Solve::new(seq)));
    if settings.analysis.enabled {
        stages.push(Stage::new("Post-analysis", PostAnalysis));
    }
}
