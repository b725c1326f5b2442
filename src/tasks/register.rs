use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::db::{Database, ImageRegistration};
use crate::scanner::{discover_images, scan_file};

use super::progress::percent;
use super::{Task, TaskContext, TaskOutput};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterSummary {
    pub created: usize,
    /// Files whose perceptual hash was already registered.
    pub existing: usize,
    /// Image id per successfully handled file, in input order.
    pub image_ids: Vec<i64>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RegisterSummary {
    pub fn processed(&self) -> usize {
        self.created + self.existing + self.failed.len()
    }
}

/// Registers a batch of files. Failures of single files are logged and
/// counted; they do not stop the batch.
pub struct RegisterImagesTask {
    db: Database,
    paths: Vec<PathBuf>,
}

impl RegisterImagesTask {
    pub fn new(db: Database, paths: Vec<PathBuf>) -> Self {
        Self { db, paths }
    }

    /// Every image below `directory` with one of `extensions`.
    pub fn from_directory(db: Database, directory: &Path, extensions: &[String]) -> Result<Self> {
        let paths = discover_images(directory, extensions)?;
        tracing::info!(directory = %directory.display(), files = paths.len(), "Discovered images");
        Ok(Self::new(db, paths))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn register_one(&self, path: &Path) -> Result<ImageRegistration> {
        let scanned = scan_file(path)?;
        Ok(self.db.register_image(&scanned.to_new_image())?)
    }
}

impl Task for RegisterImagesTask {
    fn name(&self) -> &str {
        "register"
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<TaskOutput> {
        let total = self.paths.len();
        ctx.report_forced(0, &format!("Registering {total} images"), 0, total);

        let mut summary = RegisterSummary::default();

        for (index, path) in self.paths.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::info!(id = %ctx.id(), done = index, total, "Registration cancelled");
                return Ok(TaskOutput::Registered(summary));
            }

            let label = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string());

            match self.register_one(path) {
                Ok(ImageRegistration::Created(id)) => {
                    summary.created += 1;
                    summary.image_ids.push(id);
                }
                Ok(ImageRegistration::Existing(id)) => {
                    tracing::debug!(path = %path.display(), image_id = id, "Already registered");
                    summary.existing += 1;
                    summary.image_ids.push(id);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to register image");
                    summary.failed.push((path.clone(), format!("{e:#}")));
                }
            }

            let done = index + 1;
            ctx.report_batch(done, total, &label);
            ctx.report(percent(done, total), &label, done, total);
        }

        let message = format!(
            "Registered {} new, {} existing, {} failed",
            summary.created,
            summary.existing,
            summary.failed.len()
        );
        ctx.report_forced(100, &message, total, total);
        tracing::info!(
            id = %ctx.id(),
            created = summary.created,
            existing = summary.existing,
            failed = summary.failed.len(),
            "Registration finished"
        );
        Ok(TaskOutput::Registered(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelFlag;
    use crate::db::test_support::temp_db;
    use crate::tasks::test_support::collecting_context;
    use crate::tasks::ProgressUpdate;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn write_png(path: &Path, seed: u8) {
        RgbImage::from_fn(48, 32, |x, y| {
            Rgb([
                (x as u8).wrapping_mul(seed),
                (y as u8).wrapping_mul(5),
                seed,
            ])
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn test_duplicates_and_failures_are_counted() {
        let (_db_dir, db) = temp_db();
        let files = tempdir().unwrap();
        write_png(&files.path().join("a.png"), 7);
        std::fs::copy(files.path().join("a.png"), files.path().join("b.png")).unwrap();
        std::fs::write(files.path().join("c.png"), b"junk").unwrap();

        let mut task =
            RegisterImagesTask::from_directory(db.clone(), files.path(), &["png".to_string()])
                .unwrap();
        assert_eq!(task.len(), 3);

        let (ctx, seen) = collecting_context(CancelFlag::new());
        let summary = match task.execute(&ctx).unwrap() {
            TaskOutput::Registered(summary) => summary,
            other => panic!("unexpected output {other:?}"),
        };

        assert_eq!(summary.created, 1);
        assert_eq!(summary.existing, 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].0.ends_with("c.png"));
        assert_eq!(summary.image_ids[0], summary.image_ids[1]);
        assert_eq!(db.get_image_count().unwrap(), 1);

        let seen = seen.lock().unwrap();
        let last_batch = seen
            .iter()
            .rev()
            .find_map(|u| match u {
                ProgressUpdate::Batch(b) => Some(b.clone()),
                ProgressUpdate::Progress(_) => None,
            })
            .unwrap();
        assert_eq!((last_batch.current, last_batch.total), (3, 3));
        assert_eq!(last_batch.label, "c.png");
    }

    #[test]
    fn test_cancelled_before_start_registers_nothing() {
        let (_db_dir, db) = temp_db();
        let files = tempdir().unwrap();
        write_png(&files.path().join("a.png"), 3);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut task = RegisterImagesTask::new(db.clone(), vec![files.path().join("a.png")]);
        let (ctx, _) = collecting_context(cancel);
        task.execute(&ctx).unwrap();

        assert_eq!(db.get_image_count().unwrap(), 0);
    }
}
