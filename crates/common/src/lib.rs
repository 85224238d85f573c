use std::fmt;

use serde::{Serialize, Serializer};

pub mod chart;
pub mod config;
pub mod dashboard;
pub mod diagnostics;
pub mod edge;
pub mod error;
pub mod port;
pub mod sample_table;
pub mod sink;
pub mod sweep;

pub use config::{load_config, CollectorConfig};
pub use dashboard::{DashboardBuffer, DashboardData};
pub use diagnostics::CollectionDiagnostics;
pub use edge::{Edge, EdgeDetector};
pub use port::{MemoryStore, TelemetryPort};
pub use sample_table::SampleTable;
pub use sink::{CsvSink, MemorySink, RowSink};
pub use sweep::SweepDriver;

/// One captured value. `Unknown` stands in for fields whose declared type
/// is neither double nor boolean, so rows stay column-aligned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Double(f64),
    Boolean(bool),
    Unknown,
}

impl SampleValue {
    /// Numeric view used by charts: booleans plot as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            SampleValue::Double(v) => Some(v),
            SampleValue::Boolean(b) => Some(if b { 1.0 } else { 0.0 }),
            SampleValue::Unknown => None,
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Double(v) => write!(f, "{}", v),
            SampleValue::Boolean(b) => write!(f, "{}", b),
            SampleValue::Unknown => Ok(()),
        }
    }
}

impl Serialize for SampleValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            SampleValue::Double(v) => serializer.serialize_f64(v),
            SampleValue::Boolean(b) => serializer.serialize_bool(b),
            SampleValue::Unknown => serializer.serialize_none(),
        }
    }
}

/// All fields captured in one pass, keyed by short name, in column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub index: usize,
    pub values: Vec<(String, SampleValue)>,
}

impl Sample {
    pub fn get(&self, short_name: &str) -> Option<SampleValue> {
        self.values
            .iter()
            .find(|(name, _)| name == short_name)
            .map(|(_, value)| *value)
    }
}
