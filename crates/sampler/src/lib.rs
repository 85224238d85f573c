//! Blocking sampling/sweep controller over a [`common::TelemetryPort`].

pub mod engine;

pub use engine::{
    CollectionRun, EngineError, EngineState, Pause, RunOptions, SamplingEngine, SamplingMode,
    StopReason, ThreadSleep,
};
pub use engine::request_stop;
