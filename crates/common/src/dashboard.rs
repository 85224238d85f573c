use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::{Sample, SampleValue};

/// One captured sample as seen by the live dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    pub elapsed_ms: u64,
    pub sample: Sample,
}

impl DashboardData {
    pub fn value(&self, short_name: &str) -> Option<SampleValue> {
        self.sample.get(short_name)
    }
}

#[derive(Debug)]
struct DashboardState {
    samples: VecDeque<DashboardData>,
    status: String,
    total: u64,
}

/// Thread-safe ring of recent samples plus the engine's current state.
#[derive(Clone)]
pub struct DashboardBuffer {
    state: Arc<Mutex<DashboardState>>,
    max_size: usize,
}

impl DashboardBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(DashboardState {
                samples: VecDeque::with_capacity(max_size),
                status: "Idle".to_string(),
                total: 0,
            })),
            max_size: max_size.max(1),
        }
    }

    pub fn add(&self, item: DashboardData) {
        if let Ok(mut state) = self.state.lock() {
            state.samples.push_back(item);
            state.total += 1;

            // Keep only the most recent data
            while state.samples.len() > self.max_size {
                state.samples.pop_front();
            }
        }
    }

    pub fn get_recent(&self, count: usize) -> Vec<DashboardData> {
        self.state
            .lock()
            .map(|state| {
                let start = state.samples.len().saturating_sub(count);
                state.samples.iter().skip(start).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn get_all(&self) -> Vec<DashboardData> {
        self.state
            .lock()
            .map(|state| state.samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.status = status.into();
        }
    }

    pub fn status(&self) -> String {
        self.state
            .lock()
            .map(|state| state.status.clone())
            .unwrap_or_default()
    }

    /// Samples ever added, including those already evicted.
    pub fn total(&self) -> u64 {
        self.state.lock().map(|state| state.total).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.samples.clear();
            state.total = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.samples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(index: usize) -> DashboardData {
        DashboardData {
            elapsed_ms: index as u64 * 10,
            sample: Sample {
                index,
                values: vec![("speed".to_string(), SampleValue::Double(index as f64))],
            },
        }
    }

    #[test]
    fn keeps_most_recent_items() {
        let buffer = DashboardBuffer::new(3);
        for i in 0..5 {
            buffer.add(data(i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.total(), 5);
        let recent: Vec<usize> = buffer.get_recent(2).iter().map(|d| d.sample.index).collect();
        assert_eq!(recent, vec![3, 4]);
        assert_eq!(buffer.get_all()[0].value("speed"), Some(SampleValue::Double(2.0)));

        buffer.set_status("CommandSweep");
        assert_eq!(buffer.clone().status(), "CommandSweep");
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
