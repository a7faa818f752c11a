//! Observability step sink.
//!
//! The engine reports labeled (name, value) pairs here as a case moves
//! through its states; how they are stored or rendered is the caller's
//! concern.

use serde_json::Value;
use std::sync::Mutex;
use tracing::debug;

pub trait StepSink: Send + Sync {
    fn step(&self, name: &str, value: &Value);
}

/// Default sink: steps go to the log stream.
#[derive(Debug, Default)]
pub struct TracingStepSink;

impl StepSink for TracingStepSink {
    fn step(&self, name: &str, value: &Value) {
        debug!("step | {name}: {value}");
    }
}

/// Sink that keeps steps in memory for later inspection; used by the
/// CLI for verbose output and by tests.
#[derive(Debug, Default)]
pub struct RecordingStepSink {
    steps: Mutex<Vec<(String, Value)>>,
}

impl RecordingStepSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.steps.lock().expect("step sink lock"))
    }

    pub fn len(&self) -> usize {
        self.steps.lock().expect("step sink lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StepSink for RecordingStepSink {
    fn step(&self, name: &str, value: &Value) {
        debug!("step | {name}: {value}");
        self.steps
            .lock()
            .expect("step sink lock")
            .push((name.to_string(), value.clone()));
    }
}
