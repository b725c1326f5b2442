//! Image dataset catalogue: filtered queries over images and their
//! annotations, idempotent annotation merging, and cancellable background
//! tasks with throttled progress.

pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod scanner;
pub mod tasks;

pub use cancel::CancelFlag;
pub use config::Config;
pub use db::{Database, FilterCriteria, ImageMetadata, TagMode};
pub use error::{CurioError, Result};
pub use tasks::{Task, TaskContext, TaskEvent, TaskManager, TaskOutput, TaskState};
