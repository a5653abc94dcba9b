use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::AssetConfig;
use crate::db::DerivedSizes;

/// Encoded renditions of one image, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct RenderedAssets {
    pub thumbnail: Vec<u8>,
    pub large: Vec<u8>,
    pub sizes: DerivedSizes,
}

impl RenderedAssets {
    pub fn store(&self, thumbnail_out: &Path, large_out: &Path) -> Result<()> {
        for (path, bytes) in [(thumbnail_out, &self.thumbnail), (large_out, &self.large)] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }
}

/// Size limits and encoding quality for derived renditions.
#[derive(Debug, Clone, Copy)]
pub struct AssetSpec {
    pub max_thumbnail_side: u32,
    pub max_large_side: u32,
    pub webp_quality: u8,
}

impl From<&AssetConfig> for AssetSpec {
    fn from(config: &AssetConfig) -> Self {
        Self {
            max_thumbnail_side: config.max_thumbnail_side,
            max_large_side: config.max_large_side,
            webp_quality: config.webp_quality,
        }
    }
}

/// Produces the thumbnail and large renditions of an image.
pub trait AssetGenerator: Send + Sync {
    fn render(&self, input: &Path, spec: &AssetSpec) -> Result<RenderedAssets>;

    fn generate(
        &self,
        input: &Path,
        thumbnail_out: &Path,
        large_out: &Path,
        max_thumbnail_side: u32,
        webp_quality: u8,
        max_large_side: u32,
    ) -> Result<DerivedSizes> {
        let spec = AssetSpec {
            max_thumbnail_side,
            max_large_side,
            webp_quality,
        };
        let rendered = self.render(input, &spec)?;
        rendered.store(thumbnail_out, large_out)?;
        Ok(rendered.sizes)
    }
}

/// WebP renditions upright per the EXIF orientation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailGenerator;

impl AssetGenerator for ThumbnailGenerator {
    fn render(&self, input: &Path, spec: &AssetSpec) -> Result<RenderedAssets> {
        let img = image::open(input).with_context(|| format!("Failed to decode {}", input.display()))?;
        let img = apply_orientation(img, read_exif_orientation(input));

        let large = fit(&img, spec.max_large_side);
        let thumbnail = fit(&large, spec.max_thumbnail_side);
        debug!(
            path = %input.display(),
            large = ?(large.width(), large.height()),
            thumbnail = ?(thumbnail.width(), thumbnail.height()),
            "rendered assets"
        );

        Ok(RenderedAssets {
            sizes: DerivedSizes {
                thumbnail_width: thumbnail.width(),
                thumbnail_height: thumbnail.height(),
                large_width: large.width(),
                large_height: large.height(),
            },
            thumbnail: encode_webp(&thumbnail, spec.webp_quality)?,
            large: encode_webp(&large, spec.webp_quality)?,
        })
    }
}

/// Scale down to fit a `max_side` square; smaller images are kept as is.
fn fit(img: &DynamicImage, max_side: u32) -> DynamicImage {
    if img.width() <= max_side && img.height() <= max_side {
        img.clone()
    } else {
        img.thumbnail(max_side, max_side)
    }
}

fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot encode an empty image"));
    }
    let encoded = webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode(quality as f32);
    Ok(encoded.to_vec())
}

/// EXIF orientation code (1-8) of a file, 1 when absent or unreadable.
pub fn read_exif_orientation(path: &Path) -> u32 {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return 1,
    };

    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(_) => return 1,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Where the renditions of a cataloged image live.
#[derive(Debug, Clone)]
pub struct AssetStore {
    thumbnail_dir: PathBuf,
    large_dir: PathBuf,
}

impl AssetStore {
    pub fn new(config: &AssetConfig) -> Self {
        Self {
            thumbnail_dir: config.thumbnail_dir.clone(),
            large_dir: config.large_dir.clone(),
        }
    }

    pub fn file_name(image_id: i64) -> String {
        format!("{:08}.webp", image_id)
    }

    pub fn thumbnail_path(&self, image_id: i64) -> PathBuf {
        self.thumbnail_dir.join(Self::file_name(image_id))
    }

    pub fn large_path(&self, image_id: i64) -> PathBuf {
        self.large_dir.join(Self::file_name(image_id))
    }

    pub fn store(&self, image_id: i64, assets: &RenderedAssets) -> Result<()> {
        assets.store(&self.thumbnail_path(image_id), &self.large_path(image_id))
    }

    /// Delete both renditions; missing files are fine.
    pub fn remove(&self, image_id: i64) -> Result<()> {
        for path in [self.thumbnail_path(image_id), self.large_path(image_id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn test_generate_fits_both_renditions() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("wide.png");
        RgbImage::from_pixel(400, 200, Rgb([10, 200, 30])).save(&input).unwrap();

        let thumb = dir.path().join("thumbs/00000001.webp");
        let large = dir.path().join("large/00000001.webp");
        let sizes = ThumbnailGenerator
            .generate(&input, &thumb, &large, 100, 80, 300)
            .unwrap();

        assert_eq!(
            sizes,
            DerivedSizes {
                thumbnail_width: 100,
                thumbnail_height: 50,
                large_width: 300,
                large_height: 150,
            }
        );
        assert!(thumb.exists() && large.exists());
        assert!(image::open(&thumb).is_ok());
    }

    #[test]
    fn test_small_images_are_not_upscaled() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("small.png");
        RgbImage::from_pixel(40, 30, Rgb([0, 0, 0])).save(&input).unwrap();

        let spec = AssetSpec {
            max_thumbnail_side: 256,
            max_large_side: 2048,
            webp_quality: 80,
        };
        let rendered = ThumbnailGenerator.render(&input, &spec).unwrap();
        assert_eq!((rendered.sizes.large_width, rendered.sizes.large_height), (40, 30));
        assert_eq!((rendered.sizes.thumbnail_width, rendered.sizes.thumbnail_height), (40, 30));
    }

    #[test]
    fn test_orientation_swaps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(40, 10));
        let rotated = apply_orientation(img.clone(), 6);
        assert_eq!((rotated.width(), rotated.height()), (10, 40));
        assert_eq!(apply_orientation(img, 1).width(), 40);
    }

    #[test]
    fn test_asset_names_are_zero_padded_ids() {
        assert_eq!(AssetStore::file_name(42), "00000042.webp");
    }
}
