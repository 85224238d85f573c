#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::config::{ControlBinding, Controls};
use common::port::{ConnectionListener, StoredValue};
use common::{CollectorConfig, MemoryStore, TelemetryPort};
use sampler::{request_stop, Pause};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config(json: &str) -> CollectorConfig {
    CollectorConfig::from_json_str(json).expect("test config must load")
}

/// Records every wait instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingPause {
    log: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPause {
    pub fn log(&self) -> Vec<Duration> {
        self.log.lock().unwrap().clone()
    }
}

impl Pause for RecordingPause {
    fn pause(&mut self, duration: Duration) {
        self.log.lock().unwrap().push(duration);
    }
}

/// Raises the shutdown flag after a fixed number of waits.
pub struct InterruptAfter {
    pub remaining: usize,
    pub shutdown: Arc<AtomicBool>,
}

impl Pause for InterruptAfter {
    fn pause(&mut self, _duration: Duration) {
        if self.remaining == 0 {
            self.shutdown.store(true, Ordering::Relaxed);
        } else {
            self.remaining -= 1;
        }
    }
}

/// Clears the run flag through its own handle on the store after a fixed
/// number of waits, the way a separate stop command would.
pub struct StopAfter {
    pub remaining: usize,
    pub store: MemoryStore,
    pub controls: Controls,
}

impl Pause for StopAfter {
    fn pause(&mut self, _duration: Duration) {
        if self.remaining == 0 {
            request_stop(&self.store, &self.controls);
        } else {
            self.remaining -= 1;
        }
    }
}

/// Port whose trigger flag replays a fixed script, one value per read.
///
/// The readiness gate always reads true. The run flag reads true while the
/// script still has values, so the run ends once it is exhausted.
#[derive(Clone)]
pub struct ScriptedPort {
    trigger: ControlBinding,
    run_flag: ControlBinding,
    script: Arc<Mutex<VecDeque<bool>>>,
    doubles: Arc<HashMap<String, f64>>,
    writes: Arc<Mutex<Vec<(String, StoredValue)>>>,
}

impl ScriptedPort {
    pub fn new(config: &CollectorConfig, script: &[bool], doubles: &[(&str, f64)]) -> Self {
        Self {
            trigger: config.controls.trigger_command.clone(),
            run_flag: config.controls.data_collection.clone(),
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            doubles: Arc::new(
                doubles
                    .iter()
                    .map(|(key, value)| (key.to_string(), *value))
                    .collect(),
            ),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn writes(&self) -> Vec<(String, StoredValue)> {
        self.writes.lock().unwrap().clone()
    }

    fn is(binding: &ControlBinding, table: &str, key: &str) -> bool {
        binding.table == table && binding.entry == key
    }
}

impl TelemetryPort for ScriptedPort {
    fn on_connection_change(&self, listener: ConnectionListener) {
        listener(true, "scripted");
    }

    fn get_boolean(&self, table: &str, key: &str, default: bool) -> bool {
        let mut script = self.script.lock().unwrap();
        if Self::is(&self.trigger, table, key) {
            script.pop_front().unwrap_or(false)
        } else if Self::is(&self.run_flag, table, key) {
            !script.is_empty()
        } else if key == "enabled" {
            true
        } else {
            default
        }
    }

    fn get_double(&self, _table: &str, key: &str, default: f64) -> f64 {
        self.doubles.get(key).copied().unwrap_or(default)
    }

    fn put_boolean(&self, table: &str, key: &str, value: bool) {
        self.writes
            .lock()
            .unwrap()
            .push((format!("{}/{}", table, key), StoredValue::Boolean(value)));
    }

    fn put_double(&self, table: &str, key: &str, value: f64) {
        self.writes
            .lock()
            .unwrap()
            .push((format!("{}/{}", table, key), StoredValue::Double(value)));
    }
}

/// A device that finishes every trial one poll after it is started: the
/// trigger reads true once, then false.
#[derive(Clone)]
pub struct InstantDevice {
    pub store: MemoryStore,
    trigger: ControlBinding,
}

impl InstantDevice {
    pub fn new(config: &CollectorConfig) -> Self {
        let store = MemoryStore::connect("loopback");
        store.write_flag(&config.controls.robot_enabled, true);
        Self {
            store,
            trigger: config.controls.trigger_command.clone(),
        }
    }
}

impl TelemetryPort for InstantDevice {
    fn on_connection_change(&self, listener: ConnectionListener) {
        self.store.on_connection_change(listener)
    }

    fn get_boolean(&self, table: &str, key: &str, default: bool) -> bool {
        let value = self.store.get_boolean(table, key, default);
        if table == self.trigger.table && key == self.trigger.entry && value {
            self.store.put_boolean(table, key, false);
        }
        value
    }

    fn get_double(&self, table: &str, key: &str, default: f64) -> f64 {
        self.store.get_double(table, key, default)
    }

    fn put_boolean(&self, table: &str, key: &str, value: bool) {
        self.store.put_boolean(table, key, value)
    }

    fn put_double(&self, table: &str, key: &str, value: f64) {
        self.store.put_double(table, key, value)
    }
}
