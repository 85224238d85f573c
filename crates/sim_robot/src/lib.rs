//! A simulated robot that answers the collector over the in-memory store.
//!
//! It reports connectivity, enables itself after a delay, and runs one
//! maneuver per asserted trigger: hold the trigger for the maneuver time,
//! publish a response derived from the sweep inputs, then drop the trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::time::{sleep_until, Instant};

use common::config::{CollectorConfig, ControlBinding, SweepSpec};
use common::{MemoryStore, TelemetryPort};

const CLOCK_ENTRY: &str = "Accelerometer/currentTime";
const ACCEL_ENTRY: &str = "Accelerometer/instantAccel";

/// Response for one trial: `gain * sum(v * |v|)` plus a small deterministic
/// wobble so repeated trials are not identical.
pub fn response_for(inputs: &[f64], gain: f64, trial: u64) -> f64 {
    let drive: f64 = inputs.iter().map(|v| v * v.abs()).sum();
    gain * drive + 0.01 * (trial as f64 * 1.7).sin()
}

/// Entries the collector's sweep writes to, read back when a trial ends.
fn sweep_inputs(config: &CollectorConfig) -> Vec<ControlBinding> {
    match &config.sweep {
        Some(SweepSpec::Ranged(inputs)) => inputs
            .iter()
            .map(|input| ControlBinding {
                table: input.table.clone(),
                entry: input.field.path.clone(),
            })
            .collect(),
        Some(SweepSpec::Enumerated(spec)) => vec![ControlBinding {
            table: spec.table.clone(),
            entry: spec.field.path.clone(),
        }],
        None => Vec::new(),
    }
}

pub async fn run_robot(store: MemoryStore, config: Arc<CollectorConfig>, shutdown: Arc<AtomicBool>) {
    let sim = config.simulation.clone();
    let controls = &config.controls;
    let inputs = sweep_inputs(&config);
    let remote = format!("simulated robot at {}", store.address());

    let start_time = Instant::now();
    let enable_at = start_time + sim.enable_delay;
    let mut next_tick = start_time;
    let mut cycle_id: u64 = 0;
    let mut trials: u64 = 0;
    let mut enabled = false;
    let mut maneuver_end: Option<Instant> = None;

    store.set_connected(true, &remote);

    while !shutdown.load(Ordering::Relaxed) {
        next_tick += sim.tick;
        sleep_until(next_tick).await;
        let now = Instant::now();

        // --- Telemetry ---
        let elapsed = now.duration_since(start_time).as_secs_f64();
        store.put_double(&sim.response.table, CLOCK_ENTRY, elapsed);
        store.put_double(
            &sim.response.table,
            ACCEL_ENTRY,
            (cycle_id as f64 * 0.1).sin() * 0.5,
        );
        cycle_id += 1;

        if !enabled {
            if now < enable_at {
                continue;
            }
            store.write_flag(&controls.robot_enabled, true);
            info!("Simulated robot enabled");
            enabled = true;
        }

        // --- Trials ---
        match maneuver_end {
            None if store.read_flag(&controls.trigger_command) => {
                debug!("Maneuver #{} started", trials);
                maneuver_end = Some(now + sim.maneuver);
            }
            Some(end) if now >= end => {
                let values: Vec<f64> = inputs
                    .iter()
                    .map(|b| store.get_double(&b.table, &b.entry, 0.0))
                    .collect();
                let response = response_for(&values, sim.gain, trials);
                store.put_double(&sim.response.table, &sim.response.entry, response);
                store.write_flag(&controls.trigger_command, false);
                debug!("Maneuver #{} done: inputs {:?} -> {}", trials, values, response);
                trials += 1;
                maneuver_end = None;
            }
            _ => {}
        }
    }

    store.set_connected(false, &remote);
    info!("Simulated robot stopped after {} trials", trials);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const CONFIG: &str = r#"{
        "controls": {
            "robotEnabled": { "table": "Robot", "entry": "enabled" },
            "triggerCommand": { "table": "Shuffleboard/Drive", "entry": "DriveDistance/DriveDistance/running" }
        },
        "tables": { "Shuffleboard/Drive": [ { "name": "Data/actualDistance" } ] },
        "sweep": { "name": "DriveDistance/drivingSpeed", "values": [0.5] },
        "simulation": { "gain": 40, "maneuverMs": 30, "enableDelayMs": 10, "tickMs": 5 }
    }"#;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn response_is_signed_square() {
        assert_eq!(response_for(&[0.5, -0.5], 40.0, 0), 0.0);
        assert!((response_for(&[-0.5], 40.0, 0) + 10.0).abs() < 1e-9);
        assert!((response_for(&[0.5], 40.0, 3) - 10.0).abs() < 0.011);
    }

    #[tokio::test]
    async fn enables_and_answers_one_trial() {
        let config = Arc::new(CollectorConfig::from_json_str(CONFIG).unwrap());
        let store = MemoryStore::connect("127.0.0.1");
        let shutdown = Arc::new(AtomicBool::new(false));
        let robot = tokio::spawn(run_robot(
            store.clone(),
            Arc::clone(&config),
            Arc::clone(&shutdown),
        ));

        wait_until(|| store.read_flag(&config.controls.robot_enabled)).await;
        assert!(store.is_connected());

        store.put_double("Shuffleboard/Drive", "DriveDistance/drivingSpeed", 0.5);
        store.write_flag(&config.controls.trigger_command, true);
        wait_until(|| !store.read_flag(&config.controls.trigger_command)).await;

        let distance = store.get_double("Shuffleboard/Drive", "Data/actualDistance", f64::NAN);
        assert!((distance - 10.0).abs() < 0.011, "distance {}", distance);
        assert!(store.get_double("Shuffleboard/Drive", CLOCK_ENTRY, -1.0) >= 0.0);

        shutdown.store(true, Ordering::Relaxed);
        robot.await.unwrap();
        assert!(!store.is_connected());
    }
}
