//! Per-run settings models.
//!
//! These structures describe what a client asks a run to do: the solver
//! controls written into the case dictionaries, the fluid properties, the
//! post-analysis options, and which mesh regions make up the case.
//!
//! Every field has a default so partially specified settings (for example a
//! JSON body carrying only `solver.end_time`) deserialize cleanly.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use ts_rs::TS;

/// Complete settings for one run.
///
/// # Example
///
/// ```toml
/// [solver]
/// solver = "pimpleFoam"
/// end_time = 0.05
/// parallel = true
/// num_cores = 8
///
/// [mesh]
/// regions = ["stator", "rotor_1"]
/// merge_into = "stator"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
#[serde(default)]
pub struct RunSettings {
    pub solver: SolverSettings,
    pub material: MaterialSettings,
    pub analysis: AnalysisSettings,
    pub mesh: MeshLayout,
}

/// Time stepping and solver controls.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(default)]
pub struct SolverSettings {
    /// Solver application name, e.g. `pimpleFoam`.
    pub solver: String,
    pub end_time: f64,
    pub delta_t: f64,
    pub write_interval: f64,
    /// Number of time directories kept on disk (0 keeps all).
    pub purge_write: u32,
    pub max_co: f64,
    pub max_delta_t: f64,

    /// Fixed time step when true, adaptive (Courant-limited) otherwise.
    ///
    /// Accepts a boolean or the strings `"true"`/`"false"`, as sent by
    /// HTML form clients.
    #[serde(deserialize_with = "bool_or_string")]
    pub fixed_timestep: bool,

    pub n_outer_correctors: u32,
    pub relax_p: f64,
    pub relax_u: f64,

    /// Decompose the case and run the solver under MPI.
    pub parallel: bool,
    pub num_cores: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            solver: "pimpleFoam".to_string(),
            end_time: 0.1,
            delta_t: 1e-5,
            write_interval: 0.01,
            purge_write: 0,
            max_co: 0.5,
            max_delta_t: 1e-4,
            fixed_timestep: false,
            n_outer_correctors: 4,
            relax_p: 0.2,
            relax_u: 0.5,
            parallel: false,
            num_cores: 4,
        }
    }
}

/// Fluid properties.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(default)]
pub struct MaterialSettings {
    /// kg/m^3
    pub density: f64,
    /// m^2/s
    pub kinematic_viscosity: f64,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self {
            density: 1.225,
            kinematic_viscosity: 1.5e-5,
        }
    }
}

/// Force coefficient post-analysis options.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(default)]
pub struct AnalysisSettings {
    pub enabled: bool,

    /// Leading fraction of samples discarded as start-up transient.
    pub exclude_fraction: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude_fraction: 0.2,
        }
    }
}

/// How the case's mesh is assembled.
///
/// Each region is a subdirectory of the case holding one source mesh file.
/// When `merge_into` is set, every other region is merged into that one and
/// the solver runs there.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
#[serde(default)]
pub struct MeshLayout {
    pub regions: Vec<String>,
    pub merge_into: Option<String>,
    pub cell_zones: Vec<CellZoneSpec>,
}

/// A cell zone created by `topoSet` from an imported zone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct CellZoneSpec {
    /// Name of the zone to create.
    pub name: String,
    /// Existing cell zone to copy cells from. Defaults to `name`.
    #[serde(default)]
    pub source_zone: Option<String>,
}

impl CellZoneSpec {
    pub fn source(&self) -> &str {
        self.source_zone.as_deref().unwrap_or(&self.name)
    }
}

impl RunSettings {
    /// Directory in which the solve stages operate.
    pub fn solve_dir(&self, case_root: &Path) -> PathBuf {
        match (&self.mesh.merge_into, self.mesh.regions.as_slice()) {
            (Some(master), _) => case_root.join(master),
            (None, [only]) => case_root.join(only),
            _ => case_root.to_path_buf(),
        }
    }
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got '{other}'"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_timestep_accepts_strings() {
        let s: SolverSettings = serde_json::from_str(r#"{"fixed_timestep":"true"}"#).unwrap();
        assert!(s.fixed_timestep);
        let s: SolverSettings = serde_json::from_str(r#"{"fixed_timestep":"False"}"#).unwrap();
        assert!(!s.fixed_timestep);
        let s: SolverSettings = serde_json::from_str(r#"{"fixed_timestep":true}"#).unwrap();
        assert!(s.fixed_timestep);
        assert!(serde_json::from_str::<SolverSettings>(r#"{"fixed_timestep":"maybe"}"#).is_err());
    }

    #[test]
    fn test_solve_dir() {
        let root = Path::new("/case");
        let mut settings = RunSettings::default();
        assert_eq!(settings.solve_dir(root), PathBuf::from("/case"));

        settings.mesh.regions = vec!["tunnel".to_string()];
        assert_eq!(settings.solve_dir(root), PathBuf::from("/case/tunnel"));

        settings.mesh.regions = vec!["stator".to_string(), "rotor_1".to_string()];
        assert_eq!(settings.solve_dir(root), PathBuf::from("/case"));

        settings.mesh.merge_into = Some("stator".to_string());
        assert_eq!(settings.solve_dir(root), PathBuf::from("/case/stator"));
    }

    #[test]
    fn test_cell_zone_source_defaults_to_name() {
        let zone = CellZoneSpec {
            name: "rotor".to_string(),
            source_zone: None,
        };
        assert_eq!(zone.source(), "rotor");
    }
}
