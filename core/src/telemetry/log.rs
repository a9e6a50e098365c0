use log::{debug, info, log_enabled, warn, Level};

/// Stage-scoped logger; every line carries the owning stage name.
pub struct LogManager {
    stage: &'static str,
}

impl LogManager {
    pub fn new() -> Self {
        Self::for_stage("ofdmradar")
    }

    pub fn for_stage(stage: &'static str) -> Self {
        Self { stage }
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.stage, message);
    }

    pub fn trace(&self, message: &str) {
        debug!("[{}] {}", self.stage, message);
    }

    /// Whether `trace` output would be emitted; lets hot paths skip formatting.
    pub fn tracing(&self) -> bool {
        log_enabled!(Level::Debug)
    }

    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.stage, message);
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
