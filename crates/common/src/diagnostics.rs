use std::sync::atomic::{AtomicU64, Ordering};

/// Run counters, shared between the engine, the output stage and whoever
/// reports the summary.
#[derive(Debug, Default)]
pub struct CollectionDiagnostics {
    pub samples: AtomicU64,
    pub trials: AtomicU64,
    pub unknown_values: AtomicU64,
    pub skipped_graphs: AtomicU64,
}

impl CollectionDiagnostics {
    pub fn record_sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trial(&self) {
        self.trials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_value(&self) {
        self.unknown_values.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_graph(&self) {
        self.skipped_graphs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} samples, {} trials, {} unknown values, {} skipped graphs",
            self.samples.load(Ordering::Relaxed),
            self.trials.load(Ordering::Relaxed),
            self.unknown_values.load(Ordering::Relaxed),
            self.skipped_graphs.load(Ordering::Relaxed),
        )
    }
}
