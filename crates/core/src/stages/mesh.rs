//! Mesh import and merge.

use super::log_name;
use crate::engine::{StageContext, StageOutcome, StageStep};
use crate::error::WorkflowError;
use crate::exec::runner::shell_quote;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

const POLY_MESH_FILES: [&str; 4] = ["points", "faces", "owner", "boundary"];

/// Converts a region's source mesh into the toolkit's native format.
///
/// The region directory is searched (non-recursively) for the first
/// `*.unv` or `*.msh` file by name; the matching converter runs in that
/// directory. An already converted mesh short-circuits the stage without
/// spawning anything, so repeating a mesh pipeline never double-imports.
pub struct ImportMesh {
    region: Option<String>,
    seq: usize,
}

impl ImportMesh {
    /// `region` is a subdirectory of the case; `None` imports into the case
    /// root itself.
    pub fn new(region: Option<String>, seq: usize) -> Self {
        Self { region, seq }
    }

    fn dir(&self, ctx: &StageContext) -> PathBuf {
        match &self.region {
            Some(region) => ctx.case_dir.join(region),
            None => ctx.case_dir.clone(),
        }
    }
}

#[async_trait]
impl StageStep for ImportMesh {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        let dir = self.dir(ctx);
        if has_poly_mesh(&dir) {
            info!(run_id = %ctx.run_id, dir = %dir.display(), "mesh already converted, skipping import");
            return Ok(StageOutcome::success(format!(
                "Mesh already present in {}, skipping import",
                dir.display()
            )));
        }

        let Some((source, converter)) = find_mesh_source(&dir) else {
            let err = WorkflowError::MissingPrecondition(format!(
                "no .unv or .msh mesh file in {}",
                dir.display()
            ));
            return Ok(StageOutcome::failure(err.to_string()));
        };
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let request = ctx.command(
            converter,
            format!("{converter} {}", shell_quote(&file_name)),
            &dir,
            &log_name(self.seq, "mesh_import"),
        );
        let output = ctx.execute(&request).await;
        if !output.success() {
            return Ok(StageOutcome::failure(output.failure_message(converter)));
        }
        if !has_poly_mesh(&dir) {
            return Ok(StageOutcome::failure(format!(
                "{converter} exited cleanly but constant/polyMesh in {} is incomplete",
                dir.display()
            )));
        }
        Ok(StageOutcome::success(format!(
            "Converted {file_name} with {converter}"
        )))
    }
}

/// Merges one region's mesh into the master region with `mergeMeshes`.
pub struct MergeMesh {
    master: String,
    addition: String,
    seq: usize,
}

impl MergeMesh {
    pub fn new(master: String, addition: String, seq: usize) -> Self {
        Self {
            master,
            addition,
            seq,
        }
    }
}

#[async_trait]
impl StageStep for MergeMesh {
    async fn run(&self, ctx: &StageContext) -> anyhow::Result<StageOutcome> {
        for region in [&self.master, &self.addition] {
            let dir = ctx.case_dir.join(region);
            if !has_poly_mesh(&dir) {
                let err = WorkflowError::MissingPrecondition(format!(
                    "region {region} has no converted mesh"
                ));
                return Ok(StageOutcome::failure(err.to_string()));
            }
        }

        let request = ctx.command(
            "mergeMeshes",
            format!(
                "mergeMeshes -overwrite {} {}",
                shell_quote(&self.master),
                shell_quote(&self.addition)
            ),
            &ctx.case_dir,
            &log_name(self.seq, &format!("mergeMeshes_{}", self.addition)),
        );
        let output = ctx.execute(&request).await;
        if output.success() {
            Ok(StageOutcome::success(format!(
                "Merged {} into {}",
                self.addition, self.master
            )))
        } else {
            Ok(StageOutcome::failure(output.failure_message("mergeMeshes")))
        }
    }
}

/// Whether `dir` holds a well-formed converted mesh: all four polyMesh
/// files present (plain or gzipped) and a non-empty points file.
pub fn has_poly_mesh(dir: &Path) -> bool {
    let poly = dir.join("constant").join("polyMesh");
    POLY_MESH_FILES.iter().all(|name| {
        let size = mesh_file_size(&poly, name);
        match *name {
            "points" => size.is_some_and(|s| s > 0),
            _ => size.is_some(),
        }
    })
}

fn mesh_file_size(poly: &Path, name: &str) -> Option<u64> {
    [poly.join(name), poly.join(format!("{name}.gz"))]
        .iter()
        .find_map(|p| std::fs::metadata(p).ok().filter(|m| m.is_file()))
        .map(|m| m.len())
}

/// First source mesh in `dir` by file name, with its converter.
pub fn find_mesh_source(dir: &Path) -> Option<(PathBuf, &'static str)> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find_map(|entry| {
            let converter = match entry.path().extension()?.to_str()? {
                "unv" => "ideasUnvToFoam",
                "msh" => "gmshToFoam",
                _ => return None,
            };
            Some((entry.into_path(), converter))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{context, exited, write_poly_mesh, ScriptedRunner};
    use std::fs;
    use tempfile::tempdir;
    use wf_protocol::RunSettings;

    #[tokio::test]
    async fn test_import_skips_existing_mesh() {
        let dir = tempdir().expect("Failed to create temp dir");
        write_poly_mesh(&dir.path().join("rotor"));
        let runner = ScriptedRunner::new();
        let ctx = context(dir.path(), RunSettings::default(), runner.clone());

        let step = ImportMesh::new(Some("rotor".into()), 1);
        let first = step.run(&ctx).await.expect("stage runs");
        let second = step.run(&ctx).await.expect("stage runs");

        assert!(first.success);
        assert!(second.success);
        assert!(second.message.contains("skipping import"));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_import_picks_converter_by_extension() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("b_mesh.unv"), "").expect("write");
        fs::write(dir.path().join("a_mesh.msh"), "").expect("write");
        fs::write(dir.path().join("notes.txt"), "").expect("write");
        let runner = ScriptedRunner::new();
        let ctx = context(dir.path(), RunSettings::default(), runner.clone());

        // The scripted runner does not produce a mesh, so the stage fails
        // after running the converter.
        let outcome = ImportMesh::new(None, 1).run(&ctx).await.expect("stage runs");

        assert_eq!(runner.commands(), vec!["gmshToFoam 'a_mesh.msh'"]);
        assert!(!outcome.success);
        assert!(outcome.message.contains("incomplete"));
        let requests = runner.requests.lock().expect("lock");
        assert_eq!(requests[0].work_dir, dir.path());
        assert!(requests[0].log_file.ends_with("logs/01_mesh_import.log"));
    }

    #[tokio::test]
    async fn test_import_without_source_mesh_spawns_nothing() {
        let dir = tempdir().expect("Failed to create temp dir");
        let runner = ScriptedRunner::new();
        let ctx = context(dir.path(), RunSettings::default(), runner.clone());

        let outcome = ImportMesh::new(Some("missing".into()), 1)
            .run(&ctx)
            .await
            .expect("stage runs");

        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Missing precondition"));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_import_reports_converter_failure() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("model.unv"), "").expect("write");
        let runner = ScriptedRunner::new().then(exited(3, &["bad element", ""]));
        let ctx = context(dir.path(), RunSettings::default(), runner);

        let outcome = ImportMesh::new(None, 2).run(&ctx).await.expect("stage runs");
        assert_eq!(
            outcome.message,
            "ideasUnvToFoam failed (exit code: 3): bad element"
        );
    }

    #[test]
    fn test_empty_points_is_not_well_formed() {
        let dir = tempdir().expect("Failed to create temp dir");
        write_poly_mesh(dir.path());
        assert!(has_poly_mesh(dir.path()));

        let points = dir.path().join("constant/polyMesh/points");
        fs::write(&points, "").expect("truncate");
        assert!(!has_poly_mesh(dir.path()));

        fs::remove_file(&points).expect("remove");
        fs::write(dir.path().join("constant/polyMesh/points.gz"), "gz").expect("write");
        assert!(has_poly_mesh(dir.path()));
    }

    #[tokio::test]
    async fn test_merge_runs_in_case_root() {
        let dir = tempdir().expect("Failed to create temp dir");
        write_poly_mesh(&dir.path().join("stator"));
        write_poly_mesh(&dir.path().join("rotor"));
        let runner = ScriptedRunner::new();
        let ctx = context(dir.path(), RunSettings::default(), runner.clone());

        let outcome = MergeMesh::new("stator".into(), "rotor".into(), 3)
            .run(&ctx)
            .await
            .expect("stage runs");

        assert!(outcome.success);
        assert_eq!(
            runner.commands(),
            vec!["mergeMeshes -overwrite 'stator' 'rotor'"]
        );
    }

    #[tokio::test]
    async fn test_merge_requires_converted_regions() {
        let dir = tempdir().expect("Failed to create temp dir");
        write_poly_mesh(&dir.path().join("stator"));
        let runner = ScriptedRunner::new();
        let ctx = context(dir.path(), RunSettings::default(), runner.clone());

        let outcome = MergeMesh::new("stator".into(), "rotor".into(), 3)
            .run(&ctx)
            .await
            .expect("stage runs");

        assert!(!outcome.success);
        assert!(runner.commands().is_empty());
    }
}
