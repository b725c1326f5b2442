//! Progress events and their throttling.

use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// Progress information for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    /// 0-100.
    pub percentage: u8,
    pub message: String,
    pub current: usize,
    pub total: usize,
}

impl TaskProgress {
    pub fn new(percentage: u8, message: impl Into<String>, current: usize, total: usize) -> Self {
        Self {
            percentage: percentage.min(100),
            message: message.into(),
            current,
            total,
        }
    }

    /// Percentage derived from `current / total`.
    pub fn from_counts(current: usize, total: usize, message: impl Into<String>) -> Self {
        Self::new(percent(current, total), message, current, total)
    }
}

/// Calculate progress percentage (0-100).
pub fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        0
    } else {
        ((current as f64 / total as f64) * 100.0).min(100.0) as u8
    }
}

/// Item-level progress for high-volume operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    Progress(TaskProgress),
    Batch(BatchProgress),
}

pub type ProgressSink = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Forwards progress to a sink at most once per `min_interval`.
///
/// Forced reports always go through; use them for 0%, 100% and error
/// messages. Batch progress is throttled separately and its final item
/// (`current >= total`) is never dropped.
pub struct ProgressReporter {
    sink: ProgressSink,
    min_interval: Duration,
    last_progress: Option<Instant>,
    last_batch: Option<Instant>,
}

impl ProgressReporter {
    pub fn new<F>(min_interval: Duration, sink: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
            min_interval,
            last_progress: None,
            last_batch: None,
        }
    }

    fn due(last: Option<Instant>, min_interval: Duration) -> bool {
        last.map_or(true, |at| at.elapsed() >= min_interval)
    }

    /// Returns whether the report was emitted.
    pub fn report(&mut self, percentage: u8, message: &str, current: usize, total: usize) -> bool {
        if !Self::due(self.last_progress, self.min_interval) {
            return false;
        }
        self.report_forced(percentage, message, current, total);
        true
    }

    pub fn report_forced(&mut self, percentage: u8, message: &str, current: usize, total: usize) {
        self.last_progress = Some(Instant::now());
        (self.sink)(ProgressUpdate::Progress(TaskProgress::new(
            percentage, message, current, total,
        )));
    }

    /// Returns whether the report was emitted.
    pub fn report_batch(&mut self, current: usize, total: usize, label: &str) -> bool {
        let last_item = current >= total;
        if !last_item && !Self::due(self.last_batch, self.min_interval) {
            return false;
        }
        self.last_batch = Some(Instant::now());
        (self.sink)(ProgressUpdate::Batch(BatchProgress {
            current,
            total,
            label: label.to_string(),
        }));
        true
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("min_interval", &self.min_interval)
            .field("last_progress", &self.last_progress)
            .field("last_batch", &self.last_batch)
            .finish()
    }
}
