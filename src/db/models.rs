//! Row types for images, processed variants and annotations.

use serde::{Deserialize, Serialize};

/// Anything with pixel dimensions. Used by the resolution selector.
pub trait Dimensions {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn long_side(&self) -> u32 {
        self.width().max(self.height())
    }

    fn short_side(&self) -> u32 {
        self.width().min(self.height())
    }

    fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

impl Dimensions for (u32, u32) {
    fn width(&self) -> u32 {
        self.0
    }

    fn height(&self) -> u32 {
        self.1
    }
}

/// A canonical image row.
#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub id: i64,
    pub uuid: String,
    pub phash: String,
    pub original_image_path: Option<String>,
    pub stored_image_path: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub mode: Option<String>,
    pub has_alpha: Option<bool>,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub manual_rating: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Incoming image record for registration.
#[derive(Debug, Clone, Default)]
pub struct NewImage {
    /// Generated when absent.
    pub uuid: Option<String>,
    pub phash: String,
    pub original_image_path: Option<String>,
    pub stored_image_path: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub mode: Option<String>,
    pub has_alpha: Option<bool>,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub manual_rating: Option<String>,
}

/// Outcome of registering an image. A known perceptual hash resolves to the
/// existing row instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRegistration {
    Created(i64),
    Existing(i64),
}

impl ImageRegistration {
    pub fn id(&self) -> i64 {
        match self {
            ImageRegistration::Created(id) | ImageRegistration::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ImageRegistration::Created(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedImage {
    pub id: i64,
    pub image_id: i64,
    pub stored_image_path: String,
    pub width: u32,
    pub height: u32,
    pub mode: Option<String>,
    pub has_alpha: Option<bool>,
    pub filename: String,
}

impl Dimensions for ProcessedImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewProcessedImage {
    pub image_id: i64,
    pub stored_image_path: String,
    pub width: u32,
    pub height: u32,
    pub mode: Option<String>,
    pub has_alpha: Option<bool>,
    pub filename: String,
}

/// One row of a query result: either the original image (`processed_image_id`
/// is `None`) or the processed variant chosen for the requested resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ImageMetadata {
    pub image_id: i64,
    pub processed_image_id: Option<i64>,
    pub stored_image_path: String,
    pub width: u32,
    pub height: u32,
    pub has_alpha: Option<bool>,
    pub mode: Option<String>,
    pub manual_rating: Option<String>,
}

impl Dimensions for ImageMetadata {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

impl ImageMetadata {
    pub(crate) fn from_original(image: &Image) -> Self {
        Self {
            image_id: image.id,
            processed_image_id: None,
            stored_image_path: image.stored_image_path.clone(),
            width: image.width,
            height: image.height,
            has_alpha: image.has_alpha,
            mode: image.mode.clone(),
            manual_rating: image.manual_rating.clone(),
        }
    }

    pub(crate) fn from_processed(processed: &ProcessedImage, manual_rating: Option<String>) -> Self {
        Self {
            image_id: processed.image_id,
            processed_image_id: Some(processed.id),
            stored_image_path: processed.stored_image_path.clone(),
            width: processed.width,
            height: processed.height,
            has_alpha: processed.has_alpha,
            mode: processed.mode.clone(),
            manual_rating,
        }
    }
}

// ============================================================================
// Annotations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagAnnotation {
    pub tag: String,
    pub model_id: Option<i64>,
    pub confidence_score: Option<f64>,
    pub existing: bool,
    pub is_edited_manually: Option<bool>,
    pub tag_id: Option<i64>,
}

impl TagAnnotation {
    pub fn new(tag: impl Into<String>, model_id: Option<i64>) -> Self {
        Self {
            tag: tag.into(),
            model_id,
            ..Default::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence);
        self
    }

    pub fn edited(mut self, edited: bool) -> Self {
        self.is_edited_manually = Some(edited);
        self
    }

    pub fn existing(mut self) -> Self {
        self.existing = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptionAnnotation {
    pub caption: String,
    pub model_id: Option<i64>,
    pub confidence_score: Option<f64>,
    pub existing: bool,
    pub is_edited_manually: Option<bool>,
}

impl CaptionAnnotation {
    pub fn new(caption: impl Into<String>, model_id: Option<i64>) -> Self {
        Self {
            caption: caption.into(),
            model_id,
            ..Default::default()
        }
    }

    pub fn edited(mut self, edited: bool) -> Self {
        self.is_edited_manually = Some(edited);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreAnnotation {
    pub score: f64,
    pub model_id: Option<i64>,
    pub is_edited_manually: Option<bool>,
}

impl ScoreAnnotation {
    pub fn new(score: f64, model_id: Option<i64>) -> Self {
        Self {
            score,
            model_id,
            is_edited_manually: None,
        }
    }
}

/// Ratings always name the producing model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingAnnotation {
    pub model_id: i64,
    pub raw_rating_value: String,
    pub normalized_rating: String,
    pub confidence_score: Option<f64>,
}

impl RatingAnnotation {
    pub fn new(model_id: i64, raw: impl Into<String>, normalized: impl Into<String>) -> Self {
        Self {
            model_id,
            raw_rating_value: raw.into(),
            normalized_rating: normalized.into(),
            confidence_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Annotation {
    Tag(TagAnnotation),
    Caption(CaptionAnnotation),
    Score(ScoreAnnotation),
    Rating(RatingAnnotation),
}

/// Annotations for one image, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBundle {
    #[serde(default)]
    pub tags: Vec<TagAnnotation>,
    #[serde(default)]
    pub captions: Vec<CaptionAnnotation>,
    #[serde(default)]
    pub scores: Vec<ScoreAnnotation>,
    #[serde(default)]
    pub ratings: Vec<RatingAnnotation>,
}

impl AnnotationBundle {
    pub fn push(&mut self, annotation: Annotation) {
        match annotation {
            Annotation::Tag(tag) => self.tags.push(tag),
            Annotation::Caption(caption) => self.captions.push(caption),
            Annotation::Score(score) => self.scores.push(score),
            Annotation::Rating(rating) => self.ratings.push(rating),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.captions.is_empty() && self.scores.is_empty() && self.ratings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len() + self.captions.len() + self.scores.len() + self.ratings.len()
    }
}

impl FromIterator<Annotation> for AnnotationBundle {
    fn from_iter<I: IntoIterator<Item = Annotation>>(iter: I) -> Self {
        let mut bundle = AnnotationBundle::default();
        for annotation in iter {
            bundle.push(annotation);
        }
        bundle
    }
}

/// Stored tag row, as read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct TagRow {
    pub id: i64,
    pub tag: String,
    pub model_id: Option<i64>,
    pub confidence_score: Option<f64>,
    pub existing: bool,
    pub is_edited_manually: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionRow {
    pub id: i64,
    pub caption: String,
    pub model_id: Option<i64>,
    pub confidence_score: Option<f64>,
    pub existing: bool,
    pub is_edited_manually: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub id: i64,
    pub score: f64,
    pub model_id: Option<i64>,
    pub is_edited_manually: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingRow {
    pub id: i64,
    pub model_id: i64,
    pub raw_rating_value: String,
    pub normalized_rating: String,
    pub confidence_score: Option<f64>,
}

/// All stored annotations for one image.
#[derive(Debug, Clone, Default)]
pub struct StoredAnnotations {
    pub tags: Vec<TagRow>,
    pub captions: Vec<CaptionRow>,
    pub scores: Vec<ScoreRow>,
    pub ratings: Vec<RatingRow>,
}
