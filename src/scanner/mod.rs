//! Turning files on disk into image records.

pub mod discovery;
pub mod hashing;
pub mod metadata;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::db::NewImage;

pub use discovery::{discover_images, has_image_extension};
pub use hashing::perceptual_hash;
pub use metadata::{decode_image, ImageProbe};

/// A decoded and hashed file, ready to be registered.
#[derive(Debug, Clone)]
pub struct ScannedImage {
    pub path: PathBuf,
    pub phash: String,
    pub probe: ImageProbe,
}

impl ScannedImage {
    /// Record registering this file in place (stored path = file path).
    pub fn to_new_image(&self) -> NewImage {
        let path = self.path.to_string_lossy().to_string();
        NewImage {
            uuid: None,
            phash: self.phash.clone(),
            original_image_path: Some(path.clone()),
            stored_image_path: path,
            width: self.probe.width,
            height: self.probe.height,
            format: self.probe.format.clone(),
            mode: Some(self.probe.mode.clone()),
            has_alpha: Some(self.probe.has_alpha),
            filename: self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            extension: self
                .path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase()),
            manual_rating: None,
        }
    }
}

/// Decode, measure and hash a single file.
pub fn scan_file(path: &Path) -> Result<ScannedImage> {
    let (img, probe) = decode_image(path)?;
    let phash = perceptual_hash(&img)?;
    Ok(ScannedImage {
        path: path.to_path_buf(),
        phash,
        probe,
    })
}
