//! Persistent tier: one lossy JPEG per key under the cache root.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageReader};
use serde::Serialize;
use tracing::debug;

use super::error::{CacheError, CacheErrorCode, CacheResult};
use super::key::CacheKey;
use crate::placeholder::looks_like_placeholder;
use crate::raster::{DecodedImage, ImageOrigin};

pub const DISK_JPEG_QUALITY: u8 = 85;
const ENTRY_EXT: &str = "jpg";
const TMP_MARKER: &str = ".tmp-";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DiskCacheStats {
    pub files: u64,
    pub bytes: u64,
}

/// Directory of `{hex}.jpg` files. The file's existence is the index; there
/// is no lock beyond the filesystem, concurrent writers of one key are
/// last-write-wins.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dir(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| CacheError::from_io("Failed to create thumbnail cache dir", &e))
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{ENTRY_EXT}", key.to_hex()))
    }

    /// A present, decodable, non-placeholder entry. Unreadable entries are a
    /// miss; placeholder-looking entries are deleted and reported as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<DecodedImage> {
        let path = self.path_for(key);
        if !path.is_file() {
            return None;
        }
        let img = match read_entry(&path) {
            Ok(img) => img,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "disk cache entry unreadable");
                return None;
            }
        };
        if looks_like_placeholder(&img) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "evicted placeholder disk cache entry"),
                Err(e) => debug!(path = %path.display(), error = %e, "failed to evict placeholder entry"),
            }
            return None;
        }
        Some(img)
    }

    /// Re-encodes `image` as JPEG (alpha dropped) and atomically replaces
    /// the entry. Placeholders are refused.
    pub fn store(&self, key: &CacheKey, image: &DecodedImage) -> CacheResult<()> {
        if image.is_placeholder() {
            return Err(CacheError::new(
                CacheErrorCode::PlaceholderRejected,
                "Refusing to persist placeholder image",
            ));
        }
        let rgb = image
            .to_dynamic()
            .ok_or_else(|| {
                CacheError::new(CacheErrorCode::EncodeFailed, "Image buffer size mismatch")
            })?
            .into_rgb8();

        let target = self.path_for(key);
        let tmp = tmp_path_for(&target);
        let written = (|| {
            let file = fs::File::create(&tmp)
                .map_err(|e| CacheError::from_io("Create cache entry failed", &e))?;
            let mut writer = BufWriter::new(file);
            let (w, h) = rgb.dimensions();
            JpegEncoder::new_with_quality(&mut writer, DISK_JPEG_QUALITY)
                .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| {
                    CacheError::from_external_message(format!("JPEG encode failed: {e}"))
                })?;
            writer
                .flush()
                .map_err(|e| CacheError::from_io("Write cache entry failed", &e))?;
            fs::rename(&tmp, &target)
                .map_err(|e| CacheError::from_io("Move cache entry failed", &e))
        })();
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }

    /// Returns whether an entry was present.
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::from_io("Remove cache entry failed", &e)),
        }
    }

    pub fn stats(&self) -> CacheResult<DiskCacheStats> {
        let mut stats = DiskCacheStats::default();
        for (_, len) in self.entries()? {
            stats.files += 1;
            stats.bytes = stats.bytes.saturating_add(len);
        }
        Ok(stats)
    }

    /// Deletes every cache entry (and stray temp files); returns what was
    /// removed. Other files in the directory are left alone.
    pub fn clear(&self) -> CacheResult<DiskCacheStats> {
        let mut removed = DiskCacheStats::default();
        for (path, len) in self.entries()? {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed.files += 1;
                    removed.bytes = removed.bytes.saturating_add(len);
                }
                Err(e) => debug!(path = %path.display(), error = %e, "failed to remove cache entry"),
            }
        }
        Ok(removed)
    }

    fn entries(&self) -> CacheResult<Vec<(PathBuf, u64)>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::from_io("Failed to read thumbnail cache dir", &e)),
        };
        let mut out = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            if !is_cache_file(&path) {
                continue;
            }
            if let Ok(md) = entry.metadata() {
                if md.is_file() {
                    out.push((path, md.len()));
                }
            }
        }
        Ok(out)
    }
}

fn read_entry(path: &Path) -> CacheResult<DecodedImage> {
    let img = ImageReader::open(path)
        .map_err(|e| CacheError::from_io("Open cache entry failed", &e))?
        .with_guessed_format()
        .map_err(|e| CacheError::from_external_message(format!("Failed to guess format: {e}")))?
        .decode()
        .map_err(|e| CacheError::from_external_message(format!("Decode cache entry failed: {e}")))?;
    DecodedImage::from_dynamic(img, ImageOrigin::Decoded).ok_or_else(|| {
        CacheError::new(CacheErrorCode::DecodeFailed, "Cache entry has zero size")
    })
}

fn tmp_path_for(target: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(format!("{TMP_MARKER}{}-{n}", std::process::id()));
    target.with_file_name(name)
}

fn is_cache_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let stem = match name.split_once(TMP_MARKER) {
        Some((stem, _)) => stem,
        None => name,
    };
    match stem.strip_suffix(".jpg") {
        Some(hex) => hex.len() >= 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
