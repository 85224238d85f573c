use log::debug;

use crate::config::{EnumeratedSweepSpec, SweepInputSpec, SweepSpec};
use crate::port::TelemetryPort;

/// Produces test vectors in the remote store and reports exhaustion.
///
/// Call order per trial: measure, then `is_complete`, then `advance`. The
/// vector just measured is therefore included in the sweep.
pub trait SweepDriver {
    /// Writes the first test vector.
    fn initialize(&mut self, port: &dyn TelemetryPort);
    fn is_complete(&self, port: &dyn TelemetryPort) -> bool;
    /// Writes the next test vector.
    fn advance(&mut self, port: &dyn TelemetryPort);
    /// The vector currently applied, as `(path, value)` pairs.
    fn current(&self, port: &dyn TelemetryPort) -> Vec<(String, f64)>;
}

pub fn driver_for(spec: &SweepSpec) -> Box<dyn SweepDriver + Send> {
    match spec {
        SweepSpec::Ranged(inputs) => Box::new(RangedSweep::new(inputs.clone())),
        SweepSpec::Enumerated(spec) => Box::new(EnumeratedSweep::new(spec.clone())),
    }
}

/// Start/end/increment traversal of one or more inputs.
///
/// The remote value is the source of truth for both stepping and completion.
/// `advance` does not clamp to `range_end`: stepping past the end leaves the
/// sweep permanently incomplete.
#[derive(Debug, Clone)]
pub struct RangedSweep {
    inputs: Vec<SweepInputSpec>,
}

impl RangedSweep {
    pub fn new(inputs: Vec<SweepInputSpec>) -> Self {
        Self { inputs }
    }
}

impl SweepDriver for RangedSweep {
    fn initialize(&mut self, port: &dyn TelemetryPort) {
        for input in &self.inputs {
            port.put_double(&input.table, &input.field.path, input.range_start);
        }
    }

    fn is_complete(&self, port: &dyn TelemetryPort) -> bool {
        self.inputs.iter().all(|input| {
            port.get_double(&input.table, &input.field.path, f64::NAN) == input.range_end
        })
    }

    // TODO: clamp to range_end once an inexact increment (0.1 steps) can be
    // matched against the remote value with a tolerance.
    fn advance(&mut self, port: &dyn TelemetryPort) {
        for input in &self.inputs {
            let current = port.get_double(&input.table, &input.field.path, input.range_start);
            let next = current + input.increment;
            debug!("{} {} -> {}", input.field.path, current, next);
            port.put_double(&input.table, &input.field.path, next);
        }
    }

    fn current(&self, port: &dyn TelemetryPort) -> Vec<(String, f64)> {
        self.inputs
            .iter()
            .map(|input| {
                (
                    input.field.path.clone(),
                    port.get_double(&input.table, &input.field.path, f64::NAN),
                )
            })
            .collect()
    }
}

/// An explicit value list consumed in order, one value per trial.
#[derive(Debug, Clone)]
pub struct EnumeratedSweep {
    spec: EnumeratedSweepSpec,
    index: usize,
}

impl EnumeratedSweep {
    pub fn new(spec: EnumeratedSweepSpec) -> Self {
        Self { spec, index: 0 }
    }

    pub fn position(&self) -> usize {
        self.index
    }
}

impl SweepDriver for EnumeratedSweep {
    fn initialize(&mut self, port: &dyn TelemetryPort) {
        self.index = 0;
        if let Some(&first) = self.spec.values.first() {
            port.put_double(&self.spec.table, &self.spec.field.path, first);
        }
    }

    fn is_complete(&self, _port: &dyn TelemetryPort) -> bool {
        self.index + 1 >= self.spec.values.len()
    }

    fn advance(&mut self, port: &dyn TelemetryPort) {
        if self.index < self.spec.values.len() {
            self.index += 1;
        }
        if let Some(&value) = self.spec.values.get(self.index) {
            debug!("{} -> {} ({} of {})", self.spec.field.path, value, self.index + 1, self.spec.values.len());
            port.put_double(&self.spec.table, &self.spec.field.path, value);
        }
    }

    fn current(&self, _port: &dyn TelemetryPort) -> Vec<(String, f64)> {
        self.spec
            .values
            .get(self.index)
            .map(|&value| vec![(self.spec.field.path.clone(), value)])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldSpec, ValueType};
    use crate::port::MemoryStore;

    fn speed() -> FieldSpec {
        FieldSpec {
            path: "DriveDistance/drivingSpeed".to_string(),
            value_type: ValueType::Double,
        }
    }

    #[test]
    fn ranged_sweep_completes_at_end_then_overshoots() {
        let store = MemoryStore::connect("test");
        let mut sweep = RangedSweep::new(vec![SweepInputSpec {
            table: "Drive".to_string(),
            field: speed(),
            range_start: 0.0,
            range_end: 3.0,
            increment: 1.0,
        }]);
        sweep.initialize(&store);

        for expected in [0.0, 1.0, 2.0] {
            assert_eq!(store.get_double("Drive", "DriveDistance/drivingSpeed", -1.0), expected);
            assert!(!sweep.is_complete(&store));
            sweep.advance(&store);
        }
        assert!(sweep.is_complete(&store));

        sweep.advance(&store);
        assert_eq!(store.get_double("Drive", "DriveDistance/drivingSpeed", -1.0), 4.0);
        for _ in 0..5 {
            assert!(!sweep.is_complete(&store));
            sweep.advance(&store);
        }
    }

    #[test]
    fn ranged_sweep_trusts_remote_value() {
        let store = MemoryStore::connect("test");
        let mut sweep = RangedSweep::new(vec![SweepInputSpec {
            table: "Drive".to_string(),
            field: speed(),
            range_start: 0.0,
            range_end: 3.0,
            increment: 1.0,
        }]);
        sweep.initialize(&store);
        store.put_double("Drive", "DriveDistance/drivingSpeed", 3.0);
        assert!(sweep.is_complete(&store));
        assert_eq!(sweep.current(&store), vec![("DriveDistance/drivingSpeed".to_string(), 3.0)]);
    }

    #[test]
    fn ranged_sweep_needs_every_input_at_end() {
        let store = MemoryStore::connect("test");
        let distance = FieldSpec {
            path: "DriveDistance/drivingDistance".to_string(),
            value_type: ValueType::Double,
        };
        let mut sweep = RangedSweep::new(vec![
            SweepInputSpec {
                table: "Drive".to_string(),
                field: speed(),
                range_start: 0.0,
                range_end: 1.0,
                increment: 1.0,
            },
            SweepInputSpec {
                table: "Drive".to_string(),
                field: distance,
                range_start: 12.0,
                range_end: 36.0,
                increment: 12.0,
            },
        ]);
        sweep.initialize(&store);
        sweep.advance(&store);
        assert!(!sweep.is_complete(&store));
        sweep.advance(&store);
        assert_eq!(store.get_double("Drive", "DriveDistance/drivingDistance", 0.0), 36.0);
        // speed already went past its end
        assert!(!sweep.is_complete(&store));
    }

    #[test]
    fn enumerated_sweep_yields_each_value_once() {
        let store = MemoryStore::connect("test");
        let values = vec![0.1, -0.1, 0.2, -0.2];
        let mut sweep = EnumeratedSweep::new(EnumeratedSweepSpec {
            table: "Drive".to_string(),
            field: speed(),
            values: values.clone(),
        });
        sweep.initialize(&store);

        let mut seen = Vec::new();
        loop {
            seen.push(store.get_double("Drive", "DriveDistance/drivingSpeed", f64::NAN));
            if sweep.is_complete(&store) {
                break;
            }
            sweep.advance(&store);
        }
        assert_eq!(seen, values);
        assert_eq!(sweep.position(), 3);

        // advancing an exhausted sweep writes nothing new
        sweep.advance(&store);
        assert!(sweep.is_complete(&store));
        assert_eq!(store.get_double("Drive", "DriveDistance/drivingSpeed", f64::NAN), -0.2);
        assert!(sweep.current(&store).is_empty());
    }
}
