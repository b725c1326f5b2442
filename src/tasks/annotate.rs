//! Running an external annotator over stored images and merging its output.

use anyhow::Result;
use std::sync::Arc;

use crate::db::{AnnotationBundle, Database, ImageMetadata};

use super::progress::percent;
use super::{Task, TaskContext, TaskOutput};

/// Images handed to the annotator per call.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// A registered model the annotator should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub id: i64,
    pub name: String,
}

/// Annotations produced for one image.
#[derive(Debug, Clone, Default)]
pub struct AnnotatorResult {
    pub image_id: i64,
    pub annotations: AnnotationBundle,
}

/// Produces tags, captions, scores and ratings for images.
///
/// Implementations are opaque to this crate (a local model, a remote
/// service). Results reference models by the ids in `models`.
pub trait Annotator: Send + Sync {
    fn name(&self) -> &'static str;

    fn annotate(&self, images: &[ImageMetadata], models: &[ModelRef]) -> Result<Vec<AnnotatorResult>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotateSummary {
    /// Images whose annotations were merged.
    pub annotated: usize,
    pub failed: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
}

pub struct AnnotateTask {
    db: Database,
    annotator: Arc<dyn Annotator>,
    image_ids: Vec<i64>,
    model_names: Vec<String>,
    batch_size: usize,
}

impl AnnotateTask {
    pub fn new(
        db: Database,
        annotator: Arc<dyn Annotator>,
        image_ids: Vec<i64>,
        model_names: Vec<String>,
    ) -> Self {
        Self {
            db,
            annotator,
            image_ids,
            model_names,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn resolve_models(&self) -> Result<Vec<ModelRef>> {
        let provider = self.annotator.name();
        self.model_names
            .iter()
            .map(|name| {
                let id = self.db.get_or_create_model(name, Some(provider), None)?;
                Ok(ModelRef {
                    id,
                    name: name.trim().to_string(),
                })
            })
            .collect()
    }
}

impl Task for AnnotateTask {
    fn name(&self) -> &str {
        "annotate"
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<TaskOutput> {
        let total = self.image_ids.len();
        ctx.report_forced(0, &format!("Annotating {total} images"), 0, total);

        let models = self.resolve_models()?;
        let originals = self.db.get_images_by_ids(&self.image_ids)?;
        let images: Vec<ImageMetadata> = self
            .image_ids
            .iter()
            .filter_map(|id| originals.get(id))
            .map(ImageMetadata::from_original)
            .collect();

        let mut summary = AnnotateSummary {
            failed: total - images.len(),
            ..Default::default()
        };
        let mut done = summary.failed;

        for chunk in images.chunks(self.batch_size) {
            ctx.checkpoint()?;

            let results = match self.annotator.annotate(chunk, &models) {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(
                        annotator = self.annotator.name(),
                        images = chunk.len(),
                        error = %e,
                        "Annotator failed for batch"
                    );
                    summary.failed += chunk.len();
                    done += chunk.len();
                    ctx.report(percent(done, total), "Annotator failed", done, total);
                    continue;
                }
            };

            for result in results {
                match self.db.save_annotations(result.image_id, &result.annotations) {
                    Ok(merged) => {
                        summary.annotated += 1;
                        summary.rows_inserted += merged.inserted();
                        summary.rows_updated += merged.updated();
                    }
                    Err(e) => {
                        tracing::warn!(image_id = result.image_id, error = %e, "Failed to save annotations");
                        summary.failed += 1;
                    }
                }
                done += 1;
                ctx.report_batch(done.min(total), total, &format!("image {}", result.image_id));
            }
            ctx.report(percent(done, total), "Annotating", done.min(total), total);
        }

        ctx.report_forced(
            100,
            &format!("Annotated {} images, {} failed", summary.annotated, summary.failed),
            total,
            total,
        );
        tracing::info!(
            id = %ctx.id(),
            annotated = summary.annotated,
            failed = summary.failed,
            inserted = summary.rows_inserted,
            updated = summary.rows_updated,
            "Annotation finished"
        );
        Ok(TaskOutput::Annotated(summary))
    }
}
