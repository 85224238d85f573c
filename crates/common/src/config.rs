use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SETTLE_DELAY_MS: u64 = 3_000;
const DEFAULT_RUN_FLAG_ENTRY: &str = "DataCollection";
const DEFAULT_RESPONSE_ENTRY: &str = "Data/actualDistance";

/// Identifies one remote boolean/double entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBinding {
    pub table: String,
    pub entry: String,
}

impl fmt::Display for ControlBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.entry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controls {
    /// Readiness gate, polled until true before any sampling.
    pub robot_enabled: ControlBinding,
    /// Asserted by the collector, dropped by the device when a trial ends.
    pub trigger_command: ControlBinding,
    /// User-visible run flag; the command modes stop once it reads false.
    pub data_collection: ControlBinding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Double,
    Boolean,
    /// Kept verbatim so the sampler can report it and record an unknown value.
    Unknown(String),
}

impl ValueType {
    fn parse(kind: Option<&str>) -> Self {
        match kind {
            None | Some("double") => ValueType::Double,
            Some("boolean") => ValueType::Boolean,
            Some(other) => ValueType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Double => f.write_str("double"),
            ValueType::Boolean => f.write_str("boolean"),
            ValueType::Unknown(kind) => f.write_str(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Slash-delimited key inside its table, e.g. `DriveDistance/drivingSpeed`.
    pub path: String,
    pub value_type: ValueType,
}

impl FieldSpec {
    pub fn short_name(&self) -> &str {
        short_name(&self.path)
    }
}

/// Final segment of a hierarchical name.
pub fn short_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepInputSpec {
    pub table: String,
    pub field: FieldSpec,
    pub range_start: f64,
    pub range_end: f64,
    pub increment: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumeratedSweepSpec {
    pub table: String,
    pub field: FieldSpec,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepSpec {
    Ranged(Vec<SweepInputSpec>),
    Enumerated(EnumeratedSweepSpec),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetpointValue {
    Double(f64),
    Boolean(bool),
}

/// How a derived column is computed from columns earlier in the same row.
/// Operands are short names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedOp {
    /// `magnitude` times the sign of `sign_of` (zero counts as positive).
    SignedMagnitude { magnitude: String, sign_of: String },
    Difference { minuend: String, subtrahend: String },
    /// `|minuend - subtrahend|`
    AbsDifference { minuend: String, subtrahend: String },
}

impl DerivedOp {
    pub fn operands(&self) -> [&str; 2] {
        match self {
            DerivedOp::SignedMagnitude { magnitude, sign_of } => {
                [magnitude.as_str(), sign_of.as_str()]
            }
            DerivedOp::Difference {
                minuend,
                subtrahend,
            }
            | DerivedOp::AbsDifference {
                minuend,
                subtrahend,
            } => [minuend.as_str(), subtrahend.as_str()],
        }
    }
}

/// A column computed at capture time from the raw reads of the same sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedSpec {
    pub name: String,
    pub op: DerivedOp,
}

impl DerivedSpec {
    /// `None` when an operand has no numeric value in this row.
    pub fn evaluate(&self, value_of: impl Fn(&str) -> Option<f64>) -> Option<f64> {
        let [a, b] = self.op.operands();
        let (a, b) = (value_of(a)?, value_of(b)?);
        Some(match self.op {
            DerivedOp::SignedMagnitude { .. } => {
                if b < 0.0 {
                    -a
                } else {
                    a
                }
            }
            DerivedOp::Difference { .. } => a - b,
            DerivedOp::AbsDifference { .. } => (a - b).abs(),
        })
    }
}

/// A fixed value written once before the first trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Setpoint {
    pub table: String,
    pub path: String,
    pub value: SetpointValue,
}

/// Graph declarations are validated lazily, right before rendering, so a bad
/// graph never blocks a collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSpec {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub x_field: Option<String>,
    pub y_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub sample_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            sample_interval: Duration::ZERO,
        }
    }
}

/// Behaviour of the simulated robot used for bench runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSpec {
    pub response: ControlBinding,
    pub maneuver: Duration,
    pub enable_delay: Duration,
    pub gain: f64,
    pub tick: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub controls: Controls,
    pub tables: Vec<TableSpec>,
    /// Evaluated in order after the raw reads; columns follow the tables'.
    pub derived: Vec<DerivedSpec>,
    pub sweep: Option<SweepSpec>,
    pub setpoints: Vec<Setpoint>,
    pub graphs: Vec<GraphSpec>,
    pub timing: Timing,
    pub simulation: SimulationSpec,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<CollectorConfig, ConfigError> {
    CollectorConfig::from_file(path)
}

impl CollectorConfig {
    /// Loads and validates a document: `.json` (any case) as JSON, anything
    /// else as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Column names in order: every read field's short name, then every
    /// derived column.
    pub fn field_names(&self) -> Vec<String> {
        self.fields()
            .map(|(_, field)| field.short_name().to_string())
            .chain(self.derived.iter().map(|d| d.name.clone()))
            .collect()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&TableSpec, &FieldSpec)> {
        self.tables
            .iter()
            .flat_map(|table| table.fields.iter().map(move |field| (table, field)))
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let controls = raw.controls.unwrap_or_default();
        let robot_enabled = binding("robotEnabled", controls.robot_enabled)?;
        let trigger_command = binding("triggerCommand", controls.trigger_command)?;
        let data_collection = match controls.data_collection {
            Some(raw) => binding("dataCollection", Some(raw))?,
            None => ControlBinding {
                table: trigger_command.table.clone(),
                entry: DEFAULT_RUN_FLAG_ENTRY.to_string(),
            },
        };
        let default_table = trigger_command.table.clone();

        let tables = tables(raw.tables.ok_or(ConfigError::NoTables)?)?;
        let derived = raw
            .derived
            .into_iter()
            .map(derived_spec)
            .collect::<Result<Vec<_>, _>>()?;
        check_short_names(&tables, &derived)?;

        let sweep = raw
            .sweep
            .map(|sweep| sweep_spec(sweep, &default_table))
            .transpose()?;

        let setpoints = raw
            .setpoints
            .into_iter()
            .map(|setpoint| setpoint_spec(setpoint, &default_table))
            .collect::<Result<Vec<_>, _>>()?;

        let graphs = raw
            .graphs
            .into_iter()
            .map(|graph| GraphSpec {
                title: graph.title,
                xlabel: graph.xlabel,
                ylabel: graph.ylabel,
                x_field: graph.data_x,
                y_fields: graph.data_y,
            })
            .collect();

        let timing = Timing {
            poll_interval: Duration::from_millis(
                raw.timing.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            settle_delay: Duration::from_millis(
                raw.timing.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_DELAY_MS),
            ),
            sample_interval: Duration::from_millis(raw.timing.sample_interval_ms.unwrap_or(0)),
        };

        let sim = raw.simulation.unwrap_or_default();
        let simulation = SimulationSpec {
            response: match sim.response {
                Some(raw) => binding("simulation.response", Some(raw))?,
                None => ControlBinding {
                    table: default_table.clone(),
                    entry: DEFAULT_RESPONSE_ENTRY.to_string(),
                },
            },
            maneuver: Duration::from_millis(sim.maneuver_ms.unwrap_or(2_000)),
            enable_delay: Duration::from_millis(sim.enable_delay_ms.unwrap_or(1_000)),
            gain: sim.gain.unwrap_or(1.0),
            tick: Duration::from_millis(sim.tick_ms.unwrap_or(20).max(1)),
        };

        Ok(Self {
            controls: Controls {
                robot_enabled,
                trigger_command,
                data_collection,
            },
            tables,
            derived,
            sweep,
            setpoints,
            graphs,
            timing,
            simulation,
        })
    }
}

fn binding(name: &'static str, raw: Option<RawBinding>) -> Result<ControlBinding, ConfigError> {
    let raw = raw.ok_or(ConfigError::MissingControl(name))?;
    let table = non_empty(raw.table).ok_or_else(|| ConfigError::MalformedControl {
        name,
        reason: "missing `table`".to_string(),
    })?;
    let entry = non_empty(raw.entry).ok_or_else(|| ConfigError::MalformedControl {
        name,
        reason: "missing `entry`".to_string(),
    })?;
    Ok(ControlBinding { table, entry })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn tables(raw: Vec<(String, Vec<RawField>)>) -> Result<Vec<TableSpec>, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::NoTables);
    }
    raw.into_iter()
        .map(|(name, entries)| {
            if entries.is_empty() {
                return Err(ConfigError::EmptyTable(name));
            }
            let fields = entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| {
                    let path = non_empty(entry.name)
                        .filter(|path| !short_name(path).is_empty())
                        .ok_or_else(|| ConfigError::MissingFieldName {
                            table: name.clone(),
                            index,
                        })?;
                    Ok(FieldSpec {
                        path,
                        value_type: ValueType::parse(entry.kind.as_deref()),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TableSpec { name, fields })
        })
        .collect()
}

/// Short names must be unique across read fields and derived columns, and a
/// derived column may only use columns declared before it.
fn check_short_names(tables: &[TableSpec], derived: &[DerivedSpec]) -> Result<(), ConfigError> {
    fn claim<'a>(
        seen: &mut HashMap<&'a str, String>,
        short: &'a str,
        full: String,
    ) -> Result<(), ConfigError> {
        if let Some(first) = seen.get(short) {
            return Err(ConfigError::DuplicateShortName {
                short: short.to_string(),
                first: first.clone(),
                second: full,
            });
        }
        seen.insert(short, full);
        Ok(())
    }

    let mut seen: HashMap<&str, String> = HashMap::new();
    for table in tables {
        for field in &table.fields {
            let full = format!("{}/{}", table.name, field.path);
            claim(&mut seen, field.short_name(), full)?;
        }
    }
    for spec in derived {
        if let Some(input) = spec
            .op
            .operands()
            .into_iter()
            .find(|operand| !seen.contains_key(operand))
        {
            return Err(ConfigError::UnknownDerivedInput {
                name: spec.name.clone(),
                input: input.to_string(),
            });
        }
        claim(&mut seen, &spec.name, format!("derived/{}", spec.name))?;
    }
    Ok(())
}

fn derived_spec(raw: RawDerived) -> Result<DerivedSpec, ConfigError> {
    let name = non_empty(raw.name)
        .map(|name| short_name(&name).to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ConfigError::MalformedDerived {
            name: "<unnamed>".to_string(),
            reason: "missing `name`".to_string(),
        })?;
    let malformed = |reason: String| ConfigError::MalformedDerived {
        name: name.clone(),
        reason,
    };
    let inputs: Vec<String> = raw
        .inputs
        .unwrap_or_default()
        .iter()
        .map(|path| short_name(path).to_string())
        .collect();
    let [a, b] = match <[String; 2]>::try_from(inputs) {
        Ok(pair) => pair,
        Err(inputs) => {
            return Err(malformed(format!(
                "expected 2 `inputs`, found {}",
                inputs.len()
            )))
        }
    };
    let op = match raw.op.as_deref() {
        Some("signedMagnitude") => DerivedOp::SignedMagnitude {
            magnitude: a,
            sign_of: b,
        },
        Some("difference") => DerivedOp::Difference {
            minuend: a,
            subtrahend: b,
        },
        Some("absDifference") => DerivedOp::AbsDifference {
            minuend: a,
            subtrahend: b,
        },
        Some(other) => return Err(malformed(format!("unknown op `{}`", other))),
        None => return Err(malformed("missing `op`".to_string())),
    };
    Ok(DerivedSpec { name, op })
}

fn sweep_spec(raw: RawSweep, default_table: &str) -> Result<SweepSpec, ConfigError> {
    match (raw.inputs, raw.values) {
        (Some(inputs), None) => inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| sweep_input(index, input, default_table))
            .collect::<Result<Vec<_>, _>>()
            .map(SweepSpec::Ranged),
        (None, Some(values)) => {
            let path = non_empty(raw.name).ok_or(ConfigError::MissingSweepKey {
                index: 0,
                key: "name",
            })?;
            let value_type = ValueType::parse(raw.kind.as_deref());
            if value_type != ValueType::Double {
                return Err(ConfigError::NonNumericSweep {
                    name: path,
                    found: value_type.to_string(),
                });
            }
            if values.is_empty() {
                return Err(ConfigError::EmptySweepValues(path));
            }
            if let Some(&value) = values.iter().find(|v| !v.is_finite()) {
                return Err(ConfigError::NonFiniteSweepValue { name: path, value });
            }
            Ok(SweepSpec::Enumerated(EnumeratedSweepSpec {
                table: non_empty(raw.table).unwrap_or_else(|| default_table.to_string()),
                field: FieldSpec { path, value_type },
                values,
            }))
        }
        _ => Err(ConfigError::AmbiguousSweep),
    }
}

fn sweep_input(
    index: usize,
    raw: RawSweepInput,
    default_table: &str,
) -> Result<SweepInputSpec, ConfigError> {
    let missing = |key| ConfigError::MissingSweepKey { index, key };
    let path = non_empty(raw.name).ok_or_else(|| missing("name"))?;
    let kind = raw.kind.ok_or_else(|| missing("type"))?;
    let range_start = raw.range_start.ok_or_else(|| missing("rangeStart"))?;
    let range_end = raw.range_end.ok_or_else(|| missing("rangeEnd"))?;
    let increment = raw.increment.ok_or_else(|| missing("increment"))?;

    let value_type = ValueType::parse(Some(&kind));
    if value_type != ValueType::Double {
        return Err(ConfigError::NonNumericSweep {
            name: path,
            found: kind,
        });
    }
    if let Some(value) = [range_start, range_end].into_iter().find(|v| !v.is_finite()) {
        return Err(ConfigError::NonFiniteSweepValue { name: path, value });
    }
    if !increment.is_finite() || (increment == 0.0 && range_start != range_end) {
        return Err(ConfigError::BadIncrement {
            name: path,
            increment,
        });
    }
    if (range_end - range_start) * increment < 0.0 {
        return Err(ConfigError::UnreachableEnd {
            name: path,
            start: range_start,
            end: range_end,
            increment,
        });
    }

    Ok(SweepInputSpec {
        table: non_empty(raw.table).unwrap_or_else(|| default_table.to_string()),
        field: FieldSpec { path, value_type },
        range_start,
        range_end,
        increment,
    })
}

fn setpoint_spec(raw: RawSetpoint, default_table: &str) -> Result<Setpoint, ConfigError> {
    let path = non_empty(raw.name).ok_or_else(|| ConfigError::MalformedSetpoint {
        name: "<unnamed>".to_string(),
        reason: "missing `name`".to_string(),
    })?;
    let value = match (ValueType::parse(raw.kind.as_deref()), raw.value) {
        (ValueType::Double, Some(RawScalar::Number(v))) => SetpointValue::Double(v),
        (ValueType::Boolean, Some(RawScalar::Bool(b))) => SetpointValue::Boolean(b),
        (_, None) => {
            return Err(ConfigError::MalformedSetpoint {
                name: path,
                reason: "missing `value`".to_string(),
            })
        }
        (kind, Some(_)) => {
            return Err(ConfigError::MalformedSetpoint {
                name: path,
                reason: format!("value does not match type `{}`", kind),
            })
        }
    };
    Ok(Setpoint {
        table: non_empty(raw.table).unwrap_or_else(|| default_table.to_string()),
        path,
        value,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    controls: Option<RawControls>,
    #[serde(default, deserialize_with = "ordered_tables")]
    tables: Option<Vec<(String, Vec<RawField>)>>,
    #[serde(default)]
    derived: Vec<RawDerived>,
    #[serde(default)]
    graphs: Vec<RawGraph>,
    sweep: Option<RawSweep>,
    #[serde(default)]
    setpoints: Vec<RawSetpoint>,
    #[serde(default)]
    timing: RawTiming,
    simulation: Option<RawSimulation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawControls {
    robot_enabled: Option<RawBinding>,
    trigger_command: Option<RawBinding>,
    data_collection: Option<RawBinding>,
}

#[derive(Debug, Deserialize)]
struct RawBinding {
    table: Option<String>,
    entry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDerived {
    name: Option<String>,
    op: Option<String>,
    inputs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGraph {
    title: Option<String>,
    xlabel: Option<String>,
    ylabel: Option<String>,
    data_x: Option<String>,
    data_y: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawSweep {
    inputs: Option<Vec<RawSweepInput>>,
    table: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    values: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSweepInput {
    table: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    range_start: Option<f64>,
    range_end: Option<f64>,
    increment: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Bool(bool),
    Number(f64),
}

#[derive(Debug, Deserialize)]
struct RawSetpoint {
    table: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<RawScalar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTiming {
    poll_interval_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    sample_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSimulation {
    response: Option<RawBinding>,
    maneuver_ms: Option<u64>,
    enable_delay_ms: Option<u64>,
    gain: Option<f64>,
    tick_ms: Option<u64>,
}

// Table order is column order, so the map is read as a list of pairs.
fn ordered_tables<'de, D>(deserializer: D) -> Result<Option<Vec<(String, Vec<RawField>)>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TablesVisitor;

    impl<'de> Visitor<'de> for TablesVisitor {
        type Value = Vec<(String, Vec<RawField>)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of table name to a list of entries")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut tables = Vec::new();
            while let Some((name, fields)) = map.next_entry::<String, Vec<RawField>>()? {
                tables.push((name, fields));
            }
            Ok(tables)
        }
    }

    deserializer.deserialize_map(TablesVisitor).map(Some)
}
