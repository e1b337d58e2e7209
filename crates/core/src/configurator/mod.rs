//! Writing run settings into the case's text dictionaries.
//!
//! [`FoamCaseConfigurator`] edits entries by key path through
//! [`dictionary`], leaving everything else in the files untouched.

pub mod dictionary;

use crate::error::{WorkflowError, WorkflowResult};
use std::path::Path;
use wf_protocol::RunSettings;

/// Applies settings to a case directory.
///
/// Returns one human-readable line per change made.
pub trait CaseConfigurator: Send + Sync {
    fn apply(&self, case_dir: &Path, settings: &RunSettings) -> WorkflowResult<Vec<String>>;
}

/// Configurator for OpenFOAM case layouts.
///
/// - `system/controlDict` (required): application, time control, Courant limits
/// - `system/fvSolution`: PIMPLE outer correctors and relaxation factors
/// - `constant/transportProperties`: kinematic viscosity
/// - `system/decomposeParDict`: subdomain count, when solving in parallel
#[derive(Debug, Default, Clone, Copy)]
pub struct FoamCaseConfigurator;

impl CaseConfigurator for FoamCaseConfigurator {
    fn apply(&self, case_dir: &Path, settings: &RunSettings) -> WorkflowResult<Vec<String>> {
        let mut changes = Vec::new();
        let system = case_dir.join("system");
        let solver = &settings.solver;

        let control_dict = system.join("controlDict");
        if !control_dict.is_file() {
            return Err(WorkflowError::MissingPrecondition(format!(
                "controlDict not found at {}",
                control_dict.display()
            )));
        }
        let adjust = if solver.fixed_timestep { "no" } else { "yes" };
        edit(
            &control_dict,
            &[],
            &[
                ("application", solver.solver.clone()),
                ("endTime", solver.end_time.to_string()),
                ("deltaT", solver.delta_t.to_string()),
                ("writeInterval", solver.write_interval.to_string()),
                ("purgeWrite", solver.purge_write.to_string()),
                ("maxCo", solver.max_co.to_string()),
                ("maxDeltaT", solver.max_delta_t.to_string()),
                ("adjustTimeStep", adjust.to_string()),
            ],
            &mut changes,
        )?;
        verify(&control_dict, "adjustTimeStep", adjust)?;

        let fv_solution = system.join("fvSolution");
        if fv_solution.is_file() {
            edit(
                &fv_solution,
                &["PIMPLE", "relaxationFactors.fields", "relaxationFactors.equations"],
                &[
                    (
                        "PIMPLE.nOuterCorrectors",
                        solver.n_outer_correctors.to_string(),
                    ),
                    ("relaxationFactors.fields.p", solver.relax_p.to_string()),
                    ("relaxationFactors.equations.U", solver.relax_u.to_string()),
                ],
                &mut changes,
            )?;
        }

        let transport = case_dir.join("constant").join("transportProperties");
        if transport.is_file() {
            edit(
                &transport,
                &[],
                &[("nu", settings.material.kinematic_viscosity.to_string())],
                &mut changes,
            )?;
        }

        if solver.parallel {
            let decompose = system.join("decomposeParDict");
            if !decompose.is_file() {
                let body = dictionary::foam_file(
                    "decomposeParDict",
                    "numberOfSubdomains 1;\n\nmethod          scotch;\n",
                );
                std::fs::write(&decompose, body)
                    .map_err(|e| WorkflowError::io(&decompose, e))?;
                changes.push("decomposeParDict: created".to_string());
            }
            edit(
                &decompose,
                &[],
                &[
                    ("numberOfSubdomains", solver.num_cores.to_string()),
                    ("method", "scotch".to_string()),
                ],
                &mut changes,
            )?;
        }

        Ok(changes)
    }
}

fn read(path: &Path) -> WorkflowResult<String> {
    std::fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))
}

/// Ensure `blocks` exist, set each `(path, value)`, and record the changes.
fn edit(
    path: &Path,
    blocks: &[&str],
    entries: &[(&str, String)],
    changes: &mut Vec<String>,
) -> WorkflowResult<()> {
    let dict_error = |source| WorkflowError::Dictionary {
        path: path.to_path_buf(),
        source,
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut text = read(path)?;
    for block in blocks {
        text = dictionary::ensure_block(&text, block).map_err(dict_error)?;
    }
    for (key, value) in entries {
        text = dictionary::set_entry(&text, key, value).map_err(dict_error)?;
        changes.push(format!("{name}: {key} = {value}"));
    }
    std::fs::write(path, text).map_err(|e| WorkflowError::io(path, e))
}

fn verify(path: &Path, key: &str, expected: &str) -> WorkflowResult<()> {
    let text = read(path)?;
    let actual = dictionary::get_entry(&text, key).map_err(|source| WorkflowError::Dictionary {
        path: path.to_path_buf(),
        source,
    })?;
    if actual.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(WorkflowError::Verification(format!(
            "{key} in {} is {actual:?}, expected {expected}",
            path.display()
        )))
    }
}
