use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Image files under `directory` whose extension is in `extensions`
/// (case-insensitive), sorted by path.
pub fn discover_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        anyhow::bail!("{} is not a directory", directory.display());
    }

    let mut images = Vec::new();

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable entry");
                None
            }
        })
    {
        let path = entry.path();

        if entry.file_type().is_file() && has_image_extension(path, extensions) {
            images.push(path.to_path_buf());
        }
    }

    // Stable order keeps batch progress and tests deterministic.
    images.sort();

    Ok(images)
}

/// Whether `path` ends in one of `extensions`, ignoring case.
pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_images() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("photo1.jpg")).unwrap();
        File::create(dir.path().join("photo2.PNG")).unwrap();
        File::create(dir.path().join("document.txt")).unwrap();

        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/photo3.jpeg")).unwrap();

        let extensions = vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()];
        let images = discover_images(dir.path(), &extensions).unwrap();

        assert_eq!(images.len(), 3);
        assert!(images.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(discover_images(&dir.path().join("nope"), &["png".to_string()]).is_err());
    }

    #[test]
    fn test_has_image_extension_ignores_case() {
        let extensions = vec!["png".to_string(), "jpeg".to_string()];
        assert!(has_image_extension(Path::new("/a/b/photo.PNG"), &extensions));
        assert!(has_image_extension(Path::new("photo.jpeg"), &extensions));
        assert!(!has_image_extension(Path::new("notes.txt"), &extensions));
        assert!(!has_image_extension(Path::new("no_extension"), &extensions));
    }
}
