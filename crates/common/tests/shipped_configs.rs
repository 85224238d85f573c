use std::path::PathBuf;

use common::config::SweepSpec;
use common::load_config;

fn shipped(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs")
        .join(name)
}

#[test]
fn count_config_loads() {
    let config = load_config(shipped("robot_nt_names.json")).unwrap();
    assert_eq!(
        config.field_names(),
        vec!["currentTime", "instantAccel", "drivingSpeed", "enabled"]
    );
    assert_eq!(config.graphs.len(), 1);
}

#[test]
fn stopping_distance_sweeps_twenty_speeds() {
    let config = load_config(shipped("stopping_distance.json")).unwrap();
    match config.sweep {
        Some(SweepSpec::Enumerated(ref spec)) => {
            assert_eq!(spec.values.len(), 20);
            assert_eq!(spec.values[19], -1.0);
        }
        ref other => panic!("unexpected sweep {:?}", other),
    }
    assert_eq!(config.setpoints.len(), 1);
    assert_eq!(config.simulation.gain, 40.0);
}

#[test]
fn toml_sweep_reaches_its_end() {
    let config = load_config(shipped("compensated_sweep.toml")).unwrap();
    let Some(SweepSpec::Ranged(ref inputs)) = config.sweep else {
        panic!("expected a ranged sweep");
    };
    let input = &inputs[0];
    let steps = (input.range_end - input.range_start) / input.increment;
    assert_eq!(steps, 8.0);
    assert_eq!(config.tables[1].name, "Robot");
    assert_eq!(
        config.field_names()[4..],
        ["expectedDistance".to_string(), "stoppingDistance".to_string()]
    );
    assert_eq!(config.graphs.len(), 2);
    assert_eq!(
        config.controls.data_collection.to_string(),
        "Shuffleboard/Drive/DataCollection"
    );
}
