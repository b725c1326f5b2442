use anyhow::{anyhow, Result};
use image::DynamicImage;

/// Side length of the square hash grid (16x16 = 256 bits).
const HASH_SIZE: u32 = 16;

/// Perceptual hash of a decoded image, base64 encoded.
///
/// Visually identical files (re-encoded, resized, renamed) hash alike, which
/// is what deduplicates registrations.
pub fn perceptual_hash(img: &DynamicImage) -> Result<String> {
    use img_hash::HasherConfig;

    // thumbnail() keeps the aspect ratio and is much faster than resize on
    // large inputs; the hasher downsamples again anyway.
    let thumbnail = img.thumbnail(64, 64);

    let hasher = HasherConfig::new()
        .hash_size(HASH_SIZE, HASH_SIZE)
        .to_hasher();

    // img_hash links its own `image` version; hand it raw pixels.
    let rgba = thumbnail.to_rgba8();
    let (width, height) = rgba.dimensions();
    let hash_input = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(hash_input));
    Ok(hash.to_base64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32, flip: bool) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 255) / width.max(1)) as u8;
            let v = if flip { 255 - v } else { v };
            Rgb([v, ((y * 255) / height.max(1)) as u8, 128])
        }))
    }

    #[test]
    fn test_hash_is_stable() {
        let img = gradient(64, 48, false);
        assert_eq!(perceptual_hash(&img).unwrap(), perceptual_hash(&img).unwrap());
    }

    #[test]
    fn test_different_images_differ() {
        let a = perceptual_hash(&gradient(128, 128, false)).unwrap();
        let b = perceptual_hash(&gradient(128, 128, true)).unwrap();
        assert_ne!(a, b);
    }
}
