use anyhow::Result;
use std::path::PathBuf;
use tracing::warn;
use walkdir::WalkDir;

/// Every file under `roots` whose extension is in `extensions`, sorted.
pub fn discover_images(roots: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for root in roots {
        if !root.is_dir() {
            warn!(root = %root.display(), "library root is not a directory, skipping");
            continue;
        }

        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();

            if entry.file_type().is_file() {
                if let Some(ext) = path.extension() {
                    let ext_lower = ext.to_string_lossy().to_lowercase();
                    if extensions.iter().any(|e| e.to_lowercase() == ext_lower) {
                        images.push(path.to_path_buf());
                    }
                }
            }
        }
    }

    // Sort by path for consistent ordering; nested roots would list files twice
    images.sort();
    images.dedup();

    Ok(images)
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
        let images = discover_images(&[dir.path().to_path_buf()], &extensions).unwrap();

        assert_eq!(images.len(), 3);
        assert!(images.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_nested_and_missing_roots() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("inner")).unwrap();
        File::create(dir.path().join("inner/a.jpg")).unwrap();

        let roots = vec![
            dir.path().to_path_buf(),
            dir.path().join("inner"),
            dir.path().join("missing"),
        ];
        let images = discover_images(&roots, &["jpg".to_string()]).unwrap();
        assert_eq!(images, vec![dir.path().join("inner/a.jpg")]);
    }
}
