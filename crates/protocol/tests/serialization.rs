use wf_protocol::*;

#[test]
fn test_log_event_wire_shapes() {
    let log = LogEvent::log("Time = 0.001");
    assert_eq!(
        serde_json::to_string(&log).unwrap(),
        r#"{"type":"log","line":"Time = 0.001"}"#
    );

    let progress = LogEvent::Progress {
        step: "Running solver".to_string(),
        progress: 50,
        step_num: 3,
        total_steps: 5,
    };
    assert_eq!(
        serde_json::to_string(&progress).unwrap(),
        r#"{"type":"progress","step":"Running solver","progress":50,"stepNum":3,"totalSteps":5}"#
    );

    let error = LogEvent::Error {
        step: "Checking mesh".to_string(),
        message: "fatal".to_string(),
    };
    assert_eq!(
        serde_json::to_string(&error).unwrap(),
        r#"{"type":"error","step":"Checking mesh","message":"fatal"}"#
    );

    let complete = LogEvent::Complete {
        message: "Workflow completed successfully".to_string(),
    };
    assert_eq!(
        serde_json::to_string(&complete).unwrap(),
        r#"{"type":"complete","message":"Workflow completed successfully"}"#
    );

    assert_eq!(serde_json::to_string(&LogEvent::Pong).unwrap(), r#"{"type":"pong"}"#);
}

#[test]
fn test_progress_event_deserialization() {
    let json = r#"{"type":"progress","step":"Merging meshes","progress":25,"stepNum":2,"totalSteps":4}"#;
    let event: LogEvent = serde_json::from_str(json).unwrap();

    match event {
        LogEvent::Progress {
            step,
            progress,
            step_num,
            total_steps,
        } => {
            assert_eq!(step, "Merging meshes");
            assert_eq!(progress, 25);
            assert_eq!(step_num, 2);
            assert_eq!(total_steps, 4);
        }
        other => panic!("Expected Progress, got {:?}", other),
    }
}

#[test]
fn test_run_status_serialization() {
    for (status, expected) in [
        (RunStatus::Queued, "\"queued\""),
        (RunStatus::Running, "\"running\""),
        (RunStatus::Success, "\"success\""),
        (RunStatus::Failed, "\"failed\""),
        (RunStatus::Stopped, "\"stopped\""),
    ] {
        assert_eq!(serde_json::to_string(&status).unwrap(), expected);
    }
}

#[test]
fn test_run_serialization_keeps_absent_eta_as_null() {
    let run = Run::new("prop-1");
    let value = serde_json::to_value(&run).unwrap();

    assert_eq!(value["run_id"], "prop-1");
    assert_eq!(value["status"], "queued");
    assert!(value["eta_seconds"].is_null());
    assert!(value["completed_at"].is_null());

    let back: Run = serde_json::from_value(value).unwrap();
    assert_eq!(back, run);
}

#[test]
fn test_run_settings_from_toml() {
    let toml_str = r#"
[solver]
solver = "simpleFoam"
end_time = 0.05
fixed_timestep = "true"
parallel = true
num_cores = 8

[material]
density = 1000.0

[mesh]
regions = ["stator", "rotor_1", "rotor_2"]
merge_into = "stator"
cell_zones = [{ name = "rotor_1" }, { name = "rotorZone", source_zone = "rotor_2" }]
"#;

    let settings: RunSettings = toml::from_str(toml_str).unwrap();

    assert_eq!(settings.solver.solver, "simpleFoam");
    assert_eq!(settings.solver.end_time, 0.05);
    assert!(settings.solver.fixed_timestep);
    assert!(settings.solver.parallel);
    assert_eq!(settings.solver.num_cores, 8);
    // Unspecified fields keep their defaults.
    assert_eq!(settings.solver.n_outer_correctors, 4);
    assert_eq!(settings.material.density, 1000.0);
    assert_eq!(settings.material.kinematic_viscosity, 1.5e-5);
    assert!(settings.analysis.enabled);

    assert_eq!(settings.mesh.regions.len(), 3);
    assert_eq!(settings.mesh.merge_into.as_deref(), Some("stator"));
    assert_eq!(settings.mesh.cell_zones[0].source(), "rotor_1");
    assert_eq!(settings.mesh.cell_zones[1].source(), "rotor_2");
}

#[test]
fn test_empty_settings_use_defaults() {
    let settings: RunSettings = serde_json::from_str("{}").unwrap();
    assert_eq!(settings, RunSettings::default());
}

#[test]
fn test_pipeline_kind_serialization() {
    assert_eq!(serde_json::to_string(&PipelineKind::Full).unwrap(), "\"full\"");
    let kind: PipelineKind = serde_json::from_str("\"mesh\"").unwrap();
    assert_eq!(kind, PipelineKind::Mesh);
}
