use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Shared counters for the processing chain.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames: usize,
    pub covariances: usize,
    pub spectra: usize,
    pub doa_estimates: usize,
    pub calibrations: usize,
    pub dropped_messages: usize,
    pub numerical_failures: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_frame(&self) {
        self.update(|m| m.frames += 1);
    }

    pub fn record_covariance(&self) {
        self.update(|m| m.covariances += 1);
    }

    pub fn record_spectrum(&self) {
        self.update(|m| m.spectra += 1);
    }

    pub fn record_doa_estimate(&self) {
        self.update(|m| m.doa_estimates += 1);
    }

    pub fn record_calibration(&self) {
        self.update(|m| m.calibrations += 1);
    }

    pub fn record_dropped_message(&self) {
        self.update(|m| m.dropped_messages += 1);
    }

    pub fn record_numerical_failure(&self) {
        self.update(|m| m.numerical_failures += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_counts_events() {
        let metrics = MetricsRecorder::new();
        metrics.record_frame();
        metrics.record_frame();
        metrics.record_dropped_message();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames, 2);
        assert_eq!(snapshot.dropped_messages, 1);
        assert_eq!(snapshot.calibrations, 0);
    }

    #[test]
    fn snapshot_renders_as_json() {
        let metrics = MetricsRecorder::new();
        metrics.record_calibration();
        let json = metrics.to_json().unwrap();
        assert!(json.contains("\"calibrations\":1"));
    }
}
