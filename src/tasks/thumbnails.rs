use anyhow::Result;
use image::DynamicImage;
use std::path::{Path, PathBuf};

use crate::config::ThumbnailConfig;
use crate::db::{select_best_resolution, Database};

use super::progress::percent;
use super::{Task, TaskContext, TaskOutput};

/// A downsized preview of one image.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub image_id: i64,
    /// Variant the preview was made from; `None` for the original.
    pub processed_image_id: Option<i64>,
    pub source_path: PathBuf,
    pub image: DynamicImage,
}

/// Output of [`ThumbnailLoadTask`].
#[derive(Debug, Clone, Default)]
pub struct ThumbnailBatch {
    pub thumbnails: Vec<Thumbnail>,
    /// Images with no preview: unknown id or undecodable file.
    pub failed: Vec<(i64, String)>,
}

/// Open `path` and shrink it to fit in a `size` x `size` box, keeping the
/// aspect ratio.
pub fn load_thumbnail(path: &Path, size: u32) -> Result<DynamicImage> {
    let img = image::open(path)?;
    if img.width() <= size && img.height() <= size {
        return Ok(img);
    }
    Ok(img.thumbnail(size, size))
}

/// Loads previews for a list of images, decoding the smallest stored variant
/// of each and falling back to the original.
pub struct ThumbnailLoadTask {
    db: Database,
    image_ids: Vec<i64>,
    size: u32,
}

impl ThumbnailLoadTask {
    pub fn new(db: Database, image_ids: Vec<i64>, config: &ThumbnailConfig) -> Self {
        Self {
            db,
            image_ids,
            size: config.size,
        }
    }
}

impl Task for ThumbnailLoadTask {
    fn name(&self) -> &str {
        "thumbnails"
    }

    fn execute(&mut self, ctx: &TaskContext) -> Result<TaskOutput> {
        let total = self.image_ids.len();
        ctx.report_forced(0, "Loading thumbnails", 0, total);

        let originals = self.db.get_images_by_ids(&self.image_ids)?;
        let variants = self.db.get_processed_images(&self.image_ids)?;
        ctx.checkpoint()?;

        let mut batch = ThumbnailBatch {
            thumbnails: Vec::with_capacity(total),
            failed: Vec::new(),
        };
        for (index, &image_id) in self.image_ids.iter().enumerate() {
            ctx.checkpoint()?;

            let smallest = variants
                .get(&image_id)
                .and_then(|candidates| select_best_resolution(0, candidates));
            let source = match (smallest, originals.get(&image_id)) {
                (Some(variant), _) => Some((Some(variant.id), PathBuf::from(&variant.stored_image_path))),
                (None, Some(original)) => Some((None, PathBuf::from(&original.stored_image_path))),
                (None, None) => None,
            };

            match source {
                Some((processed_image_id, source_path)) => match load_thumbnail(&source_path, self.size) {
                    Ok(image) => batch.thumbnails.push(Thumbnail {
                        image_id,
                        processed_image_id,
                        source_path,
                        image,
                    }),
                    Err(e) => {
                        tracing::warn!(image_id, path = %source_path.display(), error = %e, "Failed to load thumbnail");
                        batch.failed.push((image_id, format!("{}: {e}", source_path.display())));
                    }
                },
                None => {
                    tracing::warn!(image_id, "No such image, skipping thumbnail");
                    batch.failed.push((image_id, "image not found".to_string()));
                }
            }

            let done = index + 1;
            ctx.report(percent(done, total), "Loading thumbnails", done, total);
        }

        ctx.report_forced(
            100,
            &format!(
                "Loaded {} thumbnails, {} failed",
                batch.thumbnails.len(),
                batch.failed.len()
            ),
            total,
            total,
        );
        Ok(TaskOutput::Thumbnails(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelFlag;
    use crate::db::test_support::{new_image, temp_db};
    use crate::db::NewProcessedImage;
    use crate::tasks::test_support::collecting_context;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .save(path)
            .unwrap();
    }

    fn batch_of(output: TaskOutput) -> ThumbnailBatch {
        match output {
            TaskOutput::Thumbnails(batch) => batch,
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_smallest_variant_is_used() {
        let (_db_dir, db) = temp_db();
        let files = tempdir().unwrap();

        let mut record = new_image("p1", 800, 600);
        record.stored_image_path = files.path().join("full.png").to_string_lossy().to_string();
        write_png(Path::new(&record.stored_image_path), 80, 60);
        let image_id = db.register_image(&record).unwrap().id();

        let mut processed_ids = Vec::new();
        for (name, w, h) in [("large.png", 400, 300), ("small.png", 40, 30)] {
            let path = files.path().join(name);
            write_png(&path, w, h);
            processed_ids.push(
                db.add_processed_image(&NewProcessedImage {
                    image_id,
                    stored_image_path: path.to_string_lossy().to_string(),
                    width: w,
                    height: h,
                    filename: name.to_string(),
                    ..Default::default()
                })
                .unwrap(),
            );
        }

        let config = ThumbnailConfig { size: 32 };
        let mut task = ThumbnailLoadTask::new(db, vec![image_id], &config);
        let (ctx, _) = collecting_context(CancelFlag::new());
        let batch = batch_of(task.execute(&ctx).unwrap());
        let thumbnails = &batch.thumbnails;

        assert!(batch.failed.is_empty());
        assert_eq!(thumbnails.len(), 1);
        assert_eq!(thumbnails[0].processed_image_id, Some(processed_ids[1]));
        assert!(thumbnails[0].source_path.ends_with("small.png"));
        assert!(thumbnails[0].image.width() <= 32 && thumbnails[0].image.height() <= 32);
    }

    #[test]
    fn test_original_is_the_fallback() {
        let (_db_dir, db) = temp_db();
        let files = tempdir().unwrap();

        let mut record = new_image("p2", 64, 64);
        record.stored_image_path = files.path().join("only.png").to_string_lossy().to_string();
        write_png(Path::new(&record.stored_image_path), 64, 64);
        let image_id = db.register_image(&record).unwrap().id();

        let config = ThumbnailConfig { size: 256 };
        let mut task = ThumbnailLoadTask::new(db, vec![image_id, image_id + 100], &config);
        let (ctx, _) = collecting_context(CancelFlag::new());
        let batch = batch_of(task.execute(&ctx).unwrap());

        assert_eq!(batch.thumbnails.len(), 1);
        assert_eq!(batch.thumbnails[0].processed_image_id, None);
        assert_eq!(batch.thumbnails[0].image.width(), 64);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, image_id + 100);
    }

    #[test]
    fn test_undecodable_file_is_reported() {
        let (_db_dir, db) = temp_db();
        let files = tempdir().unwrap();

        let mut good = new_image("ok", 32, 32);
        good.stored_image_path = files.path().join("ok.png").to_string_lossy().to_string();
        write_png(Path::new(&good.stored_image_path), 32, 32);
        let good_id = db.register_image(&good).unwrap().id();

        let mut broken = new_image("broken", 32, 32);
        broken.stored_image_path = files.path().join("broken.png").to_string_lossy().to_string();
        std::fs::write(&broken.stored_image_path, b"not a png").unwrap();
        let broken_id = db.register_image(&broken).unwrap().id();

        let config = ThumbnailConfig { size: 64 };
        let mut task = ThumbnailLoadTask::new(db, vec![broken_id, good_id], &config);
        let (ctx, _) = collecting_context(CancelFlag::new());
        let batch = batch_of(task.execute(&ctx).unwrap());

        assert_eq!(batch.thumbnails.len(), 1);
        assert_eq!(batch.thumbnails[0].image_id, good_id);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, broken_id);
        assert!(batch.failed[0].1.contains("broken.png"));
    }
}
