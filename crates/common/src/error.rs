use std::path::PathBuf;

use thiserror::Error;

/// Problems with the collector's config document. Always fatal, and always
/// raised before any sampling starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("control binding `{0}` is missing")]
    MissingControl(&'static str),

    #[error("control binding `{name}` is malformed: {reason}")]
    MalformedControl { name: &'static str, reason: String },

    #[error("no tables provided to collect data from")]
    NoTables,

    #[error("table `{0}` has no entries")]
    EmptyTable(String),

    #[error("entry #{index} of table `{table}` has no `name`")]
    MissingFieldName { table: String, index: usize },

    #[error("sweep input #{index} is missing `{key}`")]
    MissingSweepKey { index: usize, key: &'static str },

    #[error("sweep input `{name}` must be a double, found `{found}`")]
    NonNumericSweep { name: String, found: String },

    #[error("sweep input `{name}` has an unusable increment {increment}")]
    BadIncrement { name: String, increment: f64 },

    #[error("sweep input `{name}` can never reach {end} from {start} by {increment}")]
    UnreachableEnd {
        name: String,
        start: f64,
        end: f64,
        increment: f64,
    },

    #[error("sweep input `{name}` has a non-finite value {value}")]
    NonFiniteSweepValue { name: String, value: f64 },

    #[error("enumerated sweep `{0}` has no values")]
    EmptySweepValues(String),

    #[error("sweep section must contain either `inputs` or `values`")]
    AmbiguousSweep,

    #[error("setpoint `{name}` is malformed: {reason}")]
    MalformedSetpoint { name: String, reason: String },

    #[error("derived column `{name}` is malformed: {reason}")]
    MalformedDerived { name: String, reason: String },

    #[error("derived column `{name}` uses `{input}`, which is not an earlier column")]
    UnknownDerivedInput { name: String, input: String },

    #[error("short name `{short}` is shared by `{first}` and `{second}`")]
    DuplicateShortName {
        short: String,
        first: String,
        second: String,
    },
}

/// A graph that cannot be rendered. Only that graph is skipped.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph is missing `{0}`")]
    MissingKey(&'static str),

    #[error("graph references unknown field `{0}`")]
    UnknownField(String),

    #[error("graph has no plottable rows")]
    NoData,

    #[error("failed to render graph: {0}")]
    Render(String),
}

/// Failures in the row-oriented output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("csv output failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("output failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The connection listener went away before the transport ever reported in.
#[derive(Debug, Error)]
#[error("telemetry transport dropped its connection listener before connecting")]
pub struct ConnectError;
