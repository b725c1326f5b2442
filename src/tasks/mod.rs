//! Background task management for non-blocking operations.
//!
//! Each task runs on its own thread, owns a cancellation flag and reports
//! throttled progress. The [`TaskManager`] tracks the active set and fans task
//! events out to subscribers over channels.

pub mod annotate;
pub mod manager;
pub mod progress;
pub mod register;
pub mod search;
pub mod single_flight;
pub mod thumbnails;

use std::sync::{Arc, Mutex, PoisonError};

use crate::cancel::CancelFlag;
use crate::db::ImageMetadata;

pub use annotate::{AnnotateSummary, AnnotateTask, Annotator, AnnotatorResult, ModelRef};
pub use manager::TaskManager;
pub use progress::{BatchProgress, ProgressReporter, ProgressUpdate, TaskProgress};
pub use register::{RegisterImagesTask, RegisterSummary};
pub use search::SearchTask;
pub use single_flight::SingleFlight;
pub use thumbnails::{Thumbnail, ThumbnailBatch, ThumbnailLoadTask};

/// State of a task.
///
/// `Idle -> Running -> {Completed | Failed | Canceling -> Canceled}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Canceling,
    Completed,
    Canceled,
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed(_)
        )
    }
}

/// Result produced by a task that completed without being cancelled.
#[derive(Debug)]
pub enum TaskOutput {
    Search {
        records: Vec<ImageMetadata>,
        count: usize,
    },
    Registered(RegisterSummary),
    Thumbnails(ThumbnailBatch),
    Annotated(AnnotateSummary),
    Message(String),
}

/// Events published by the [`TaskManager`]. Events of one task arrive in the
/// order that task emitted them.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started { id: String, name: String },
    Progress { id: String, progress: TaskProgress },
    BatchProgress { id: String, progress: BatchProgress },
    Completed { id: String, output: Arc<TaskOutput> },
    Failed { id: String, error: String },
    Canceled { id: String },
    /// The active set became empty.
    AllFinished,
}

impl TaskEvent {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskEvent::Started { id, .. }
            | TaskEvent::Progress { id, .. }
            | TaskEvent::BatchProgress { id, .. }
            | TaskEvent::Completed { id, .. }
            | TaskEvent::Failed { id, .. }
            | TaskEvent::Canceled { id } => Some(id),
            TaskEvent::AllFinished => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Completed { .. } | TaskEvent::Failed { .. } | TaskEvent::Canceled { .. }
        )
    }
}

/// A unit of work run by the [`TaskManager`].
///
/// `execute` runs on the task's own thread. It should check
/// [`TaskContext::is_cancelled`] at safe points and return early once it is
/// set; whatever it returns after that is discarded.
pub trait Task: Send + 'static {
    fn name(&self) -> &str;

    fn execute(&mut self, ctx: &TaskContext) -> anyhow::Result<TaskOutput>;
}

/// Adapter that turns a closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> FnTask<F>
where
    F: FnMut(&TaskContext) -> anyhow::Result<TaskOutput> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&TaskContext) -> anyhow::Result<TaskOutput> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &TaskContext) -> anyhow::Result<TaskOutput> {
        (self.f)(ctx)
    }
}

/// Handed to [`Task::execute`]: the cancellation flag and progress channel.
pub struct TaskContext {
    id: String,
    cancel: CancelFlag,
    reporter: Mutex<ProgressReporter>,
}

impl TaskContext {
    pub fn new(id: impl Into<String>, cancel: CancelFlag, reporter: ProgressReporter) -> Self {
        Self {
            id: id.into(),
            cancel,
            reporter: Mutex::new(reporter),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> crate::error::Result<()> {
        self.cancel.checkpoint()
    }

    /// Throttled progress report. Returns whether it was emitted.
    pub fn report(&self, percentage: u8, message: &str, current: usize, total: usize) -> bool {
        self.reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .report(percentage, message, current, total)
    }

    /// Unthrottled progress report, for start, finish and error messages.
    pub fn report_forced(&self, percentage: u8, message: &str, current: usize, total: usize) {
        self.reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .report_forced(percentage, message, current, total);
    }

    pub fn report_batch(&self, current: usize, total: usize, label: &str) -> bool {
        self.reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .report_batch(current, total, label)
    }
}
