use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;

use common::config::{CollectorConfig, Controls, SetpointValue, ValueType};
use common::error::SinkError;
use common::sweep::{driver_for, SweepDriver};
use common::{
    CollectionDiagnostics, DashboardBuffer, DashboardData, Edge, EdgeDetector, RowSink, Sample,
    SampleTable, SampleValue, TelemetryPort,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot write header row: {0}")]
    Header(#[source] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Capture a fixed number of samples back to back.
    Count(usize),
    /// One sample per falling edge of the trigger-command flag, until the run
    /// flag drops.
    Command,
    /// `Command`, driving the configured sweep between trials.
    CommandSweep,
    /// Declared but not implemented: no cadence or stop rule is defined.
    TimeWindowed(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    WaitingForReady,
    Counting,
    CommandTriggered,
    CommandSweep,
    TimeWindowed,
    Done,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CountReached,
    RunFlagCleared,
    SweepComplete,
    Interrupted,
    Unsupported,
    /// The row sink rejected a row; samples captured so far are kept.
    SinkFailed,
}

/// How the engine waits. Swapped out in tests so runs do not sleep.
pub trait Pause {
    fn pause(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Pause for ThreadSleep {
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub mode: SamplingMode,
    pub write_header: bool,
}

/// What a finished (or interrupted) run hands to the output stage.
#[derive(Debug)]
pub struct CollectionRun {
    pub table: SampleTable,
    pub stop_reason: StopReason,
    pub final_state: EngineState,
    pub sink_error: Option<SinkError>,
}

/// The sampling/sweep controller.
///
/// Single-threaded: every remote read, write and wait blocks the caller. The
/// only cross-thread input is the shutdown flag, checked on every loop turn.
pub struct SamplingEngine<'a, P: TelemetryPort> {
    config: &'a CollectorConfig,
    port: P,
    sink: Box<dyn RowSink + 'a>,
    pause: Box<dyn Pause + 'a>,
    shutdown: Arc<AtomicBool>,
    diagnostics: Arc<CollectionDiagnostics>,
    dashboard: Option<DashboardBuffer>,
    table: SampleTable,
    state: EngineState,
    start_time: Instant,
}

impl<'a, P: TelemetryPort> SamplingEngine<'a, P> {
    pub fn new(config: &'a CollectorConfig, port: P, sink: impl RowSink + 'a) -> Self {
        Self {
            config,
            port,
            sink: Box::new(sink),
            pause: Box::new(ThreadSleep),
            shutdown: Arc::new(AtomicBool::new(false)),
            diagnostics: Arc::new(CollectionDiagnostics::default()),
            dashboard: None,
            table: SampleTable::new(config.field_names()),
            state: EngineState::Idle,
            start_time: Instant::now(),
        }
    }

    pub fn with_pause(mut self, pause: impl Pause + 'a) -> Self {
        self.pause = Box::new(pause);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<CollectionDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_dashboard(mut self, dashboard: DashboardBuffer) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Runs one collection to completion.
    ///
    /// Only a failed header write is an error. A row that cannot be written
    /// ends the run with [`StopReason::SinkFailed`]; the returned table still
    /// holds every sample captured, including the one that failed to write.
    pub fn run(mut self, options: RunOptions) -> Result<CollectionRun, EngineError> {
        self.start_time = Instant::now();
        if options.write_header {
            let header = self.table.field_names().to_vec();
            self.sink.write_header(&header).map_err(EngineError::Header)?;
        }

        let mut sink_error = None;
        let stop_reason = match self.drive(options.mode) {
            Ok(reason) => reason,
            Err(e) => {
                error!("Cannot write sample, stopping: {}", e);
                sink_error = Some(e);
                StopReason::SinkFailed
            }
        };
        if let Err(e) = self.sink.flush() {
            error!("Cannot flush output: {}", e);
            sink_error.get_or_insert(e);
        }
        self.transition(EngineState::Done);
        info!("Done collecting data ({:?}, {} samples)", stop_reason, self.table.len());

        Ok(CollectionRun {
            table: self.table,
            stop_reason,
            final_state: self.state,
            sink_error,
        })
    }

    fn drive(&mut self, mode: SamplingMode) -> Result<StopReason, SinkError> {
        self.transition(EngineState::WaitingForReady);
        if !self.wait_for_ready() {
            return Ok(StopReason::Interrupted);
        }
        self.apply_setpoints();

        let config = self.config;
        match mode {
            SamplingMode::Count(target) => {
                self.transition(EngineState::Counting);
                self.run_counting(target)
            }
            SamplingMode::Command => {
                self.transition(EngineState::CommandTriggered);
                self.run_command(None)
            }
            SamplingMode::CommandSweep => {
                self.transition(EngineState::CommandSweep);
                match config.sweep.as_ref() {
                    Some(spec) => self.run_command(Some(driver_for(spec))),
                    None => {
                        warn!("No sweep configured; running plain command-triggered sampling");
                        self.run_command(None)
                    }
                }
            }
            SamplingMode::TimeWindowed(duration) => {
                self.transition(EngineState::TimeWindowed);
                warn!(
                    "Time-windowed sampling ({:?}) has no defined cadence; no samples captured",
                    duration
                );
                Ok(StopReason::Unsupported)
            }
        }
    }

    fn wait_for_ready(&mut self) -> bool {
        let config = self.config;
        let binding = &config.controls.robot_enabled;
        info!("Waiting for robot to be enabled ({})", binding);
        while !self.port.read_flag(binding) {
            if self.interrupted() {
                return false;
            }
            self.pause.pause(config.timing.poll_interval);
        }
        info!("Robot is enabled");
        true
    }

    fn apply_setpoints(&mut self) {
        let config = self.config;
        for setpoint in &config.setpoints {
            debug!("Setpoint {}/{} = {:?}", setpoint.table, setpoint.path, setpoint.value);
            match setpoint.value {
                SetpointValue::Double(v) => self.port.put_double(&setpoint.table, &setpoint.path, v),
                SetpointValue::Boolean(b) => {
                    self.port.put_boolean(&setpoint.table, &setpoint.path, b)
                }
            }
        }
    }

    fn run_counting(&mut self, target: usize) -> Result<StopReason, SinkError> {
        while self.table.len() < target {
            if self.interrupted() {
                return Ok(StopReason::Interrupted);
            }
            self.capture()?;
            if self.table.len() < target {
                self.pause.pause(self.config.timing.sample_interval);
            }
        }
        Ok(StopReason::CountReached)
    }

    /// Trigger loop shared by the command modes: assert the trigger, wait for
    /// the device to drop it, settle, capture, then (with a sweep) check for
    /// completion before stepping to the next vector.
    fn run_command(
        &mut self,
        mut sweep: Option<Box<dyn SweepDriver + Send>>,
    ) -> Result<StopReason, SinkError> {
        let config = self.config;
        let controls = &config.controls;
        let timing = config.timing;

        self.port.write_flag(&controls.data_collection, true);
        if let Some(sweep) = sweep.as_mut() {
            sweep.initialize(&self.port);
            debug!("Sweep starts at {:?}", sweep.current(&self.port));
        }

        let mut edge = EdgeDetector::new(self.port.read_flag(&controls.trigger_command));
        self.port.write_flag(&controls.trigger_command, true);

        let outcome = loop {
            if self.interrupted() {
                break Ok(StopReason::Interrupted);
            }
            if !self.port.read_flag(&controls.data_collection) {
                info!("Run flag {} cleared", controls.data_collection);
                break Ok(StopReason::RunFlagCleared);
            }

            if edge.observe(self.port.read_flag(&controls.trigger_command)) == Edge::Falling {
                self.diagnostics.record_trial();
                self.pause.pause(timing.settle_delay);
                if let Err(e) = self.capture() {
                    break Err(e);
                }

                if let Some(sweep) = sweep.as_mut() {
                    if sweep.is_complete(&self.port) {
                        break Ok(StopReason::SweepComplete);
                    }
                    sweep.advance(&self.port);
                    debug!("Next test vector {:?}", sweep.current(&self.port));
                }
                self.port.write_flag(&controls.trigger_command, true);
            }

            self.pause.pause(timing.poll_interval);
        };

        self.port.write_flag(&controls.data_collection, false);
        outcome
    }

    /// Reads every configured field, evaluates the derived columns and
    /// appends them as one row.
    fn capture(&mut self) -> Result<(), SinkError> {
        let index = self.table.len();
        let mut values = Vec::with_capacity(self.table.field_names().len());

        let config = self.config;
        for (table, field) in config.fields() {
            let name = field.short_name();
            let value = match &field.value_type {
                ValueType::Double => {
                    SampleValue::Double(self.port.get_double(&table.name, &field.path, 0.0))
                }
                ValueType::Boolean => {
                    SampleValue::Boolean(self.port.get_boolean(&table.name, &field.path, false))
                }
                ValueType::Unknown(kind) => {
                    warn!("Unknown sample type {} for sample {}. Using None.", kind, name);
                    self.diagnostics.record_unknown_value();
                    SampleValue::Unknown
                }
            };
            debug!("Collected sample {}={} from table {}", name, value, table.name);
            values.push((name.to_string(), value));
        }

        for spec in &config.derived {
            let value = spec
                .evaluate(|operand| {
                    values
                        .iter()
                        .find(|(name, _)| name == operand)
                        .and_then(|(_, value)| value.as_f64())
                })
                .map_or(SampleValue::Unknown, SampleValue::Double);
            debug!("Derived {}={}", spec.name, value);
            values.push((spec.name.clone(), value));
        }

        let sample = Sample { index, values };
        self.table.append(&sample);
        self.diagnostics.record_sample();
        info!("Sample #{}: {}", index, describe(&sample));
        self.sink.write_row(&sample)?;

        if let Some(dashboard) = &self.dashboard {
            dashboard.add(DashboardData {
                elapsed_ms: self.start_time.elapsed().as_millis() as u64,
                sample,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: EngineState) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
        if let Some(dashboard) = &self.dashboard {
            dashboard.set_status(next.to_string());
        }
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Clears the run flag so a collector sampling in a command mode stops after
/// its current poll.
pub fn request_stop<P: TelemetryPort + ?Sized>(port: &P, controls: &Controls) {
    info!("Requesting stop: clearing {}", controls.data_collection);
    port.write_flag(&controls.data_collection, false);
}

fn describe(sample: &Sample) -> String {
    sample
        .values
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}
