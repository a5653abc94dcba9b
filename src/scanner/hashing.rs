use anyhow::{anyhow, Context, Result};
use img_hash::{HashAlg, HasherConfig};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Identity of a file's bytes plus a similarity hash of its pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub content_hash: String,
    pub perceptual_hash: String,
}

/// How the strong hash reads and processes a file.
#[derive(Debug)]
pub struct ContentHasher {
    chunk_size: usize,
    pool: Option<rayon::ThreadPool>,
}

impl ContentHasher {
    /// `threads > 1` hashes each chunk with BLAKE3's own parallelism in a
    /// dedicated pool of that many threads.
    pub fn new(chunk_size: usize, threads: usize) -> Result<Self> {
        let pool = if threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("blake3-{}", i))
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            chunk_size: chunk_size.max(1),
            pool,
        })
    }

    /// BLAKE3 of the file contents as lowercase hex.
    pub fn content_hash(&self, path: &Path) -> Result<String> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut reader = BufReader::with_capacity(self.chunk_size, file);

        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            match &self.pool {
                Some(pool) => pool.install(|| {
                    hasher.update_rayon(&buffer[..bytes_read]);
                }),
                None => {
                    hasher.update(&buffer[..bytes_read]);
                }
            }
        }

        Ok(hasher.finalize().to_hex().to_string())
    }

    pub fn fingerprint(&self, path: &Path) -> Result<Fingerprint> {
        Ok(Fingerprint {
            content_hash: self.content_hash(path)?,
            perceptual_hash: perceptual_hash(path)?,
        })
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            pool: None,
        }
    }
}

/// 8x8 average hash of the decoded image as hex. Decode failures are errors.
pub fn perceptual_hash(path: &Path) -> Result<String> {
    let img = image::open(path).with_context(|| format!("Failed to decode {}", path.display()))?;

    // thumbnail() preserves aspect ratio and is faster than resize for large images
    let thumbnail = img.thumbnail(64, 64);

    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Mean)
        .hash_size(8, 8)
        .to_hasher();

    // img_hash links its own image version; hand the pixels over raw
    let rgba = thumbnail.to_rgba8();
    let (width, height) = rgba.dimensions();

    let img_hash_image = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(img_hash_image));

    Ok(hash.as_bytes().iter().map(|b| format!("{:02x}", b)).collect())
}

pub fn content_hash(path: &Path) -> Result<String> {
    ContentHasher::default().content_hash(path)
}

pub fn fingerprint(path: &Path) -> Result<Fingerprint> {
    ContentHasher::default().fingerprint(path)
}
