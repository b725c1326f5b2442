use crate::db::{Database, FilterCriteria};

use super::{Task, TaskContext, TaskOutput};

/// Runs one [`FilterCriteria`] query off the caller's thread.
pub struct SearchTask {
    db: Database,
    criteria: FilterCriteria,
}

impl SearchTask {
    pub fn new(db: Database, criteria: FilterCriteria) -> Self {
        Self { db, criteria }
    }
}

impl Task for SearchTask {
    fn name(&self) -> &str {
        "search"
    }

    fn execute(&mut self, ctx: &TaskContext) -> anyhow::Result<TaskOutput> {
        ctx.report_forced(0, "Searching", 0, 0);

        let (records, count) = self
            .db
            .find_images_cancellable(&self.criteria, ctx.cancel_flag())?;

        ctx.report_forced(100, &format!("Found {count} images"), count, count);
        tracing::debug!(id = %ctx.id(), count, "Search finished");
        Ok(TaskOutput::Search { records, count })
    }
}
