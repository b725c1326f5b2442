use anyhow::{Context, Result};
use image::{DynamicImage, ImageReader};
use std::path::Path;

/// What registration needs to know about a decoded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProbe {
    pub width: u32,
    pub height: u32,
    /// Upper-case container name, e.g. `PNG`.
    pub format: String,
    /// Pixel layout, e.g. `Rgba8`.
    pub mode: String,
    pub has_alpha: bool,
}

impl ImageProbe {
    pub fn from_decoded(img: &DynamicImage, format: Option<image::ImageFormat>) -> Self {
        let color = img.color();
        Self {
            width: img.width(),
            height: img.height(),
            format: format
                .map(|f| format!("{:?}", f).to_uppercase())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            mode: format!("{:?}", color),
            has_alpha: color.has_alpha(),
        }
    }
}

/// Decode `path`, sniffing the format from its content rather than trusting
/// the extension.
pub fn decode_image(path: &Path) -> Result<(DynamicImage, ImageProbe)> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("reading {}", path.display()))?;
    let format = reader.format();
    let img = reader
        .decode()
        .with_context(|| format!("decoding {}", path.display()))?;
    let probe = ImageProbe::from_decoded(&img, format);
    Ok((img, probe))
}
