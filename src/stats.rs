use crate::error::{InferenceError, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Per-batch model invocation times, in seconds.
#[derive(Clone, Debug, Default)]
pub struct RunStats {
    timings: Vec<f64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.record_secs(elapsed.as_secs_f64());
    }

    pub fn record_secs(&mut self, secs: f64) {
        self.timings.push(secs);
    }

    pub fn mean(&self) -> Option<f64> {
        if self.timings.is_empty() {
            return None;
        }
        Some(self.timings.iter().sum::<f64>() / self.timings.len() as f64)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self
            .timings
            .iter()
            .map(|t| (t - mean).powi(2))
            .sum::<f64>()
            / self.timings.len() as f64;
        Some(variance.sqrt())
    }

    /// `Runtime <mean>+-<std>`, or `None` when nothing was recorded.
    pub fn summary(&self) -> Option<String> {
        let mean = self.mean()?;
        let std = self.std_dev()?;
        Some(format!("Runtime {mean:.4}+-{std:.4}"))
    }

    /// Write the summary line to `path`, replacing any previous report.
    ///
    /// Returns the written line. An empty run writes nothing.
    pub fn write_report(&self, path: &Path) -> Result<Option<String>> {
        let Some(summary) = self.summary() else {
            warn!(path = %path.display(), "no batches were timed, skipping runtime report");
            return Ok(None);
        };
        fs::write(path, &summary).map_err(|err| InferenceError::io(path, err))?;
        info!(path = %path.display(), "{summary}");
        Ok(Some(summary))
    }
}
