//! The façade UI callers talk to. Every request resolves to a displayable
//! image: memory tier, then disk tier, then the decode pipeline, then a
//! placeholder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{CacheKey, DiskCache, MemoryCache};
use crate::config::ServiceConfig;
use crate::decode::{DecodePipeline, SourceDecoder};
use crate::errors::domain::DomainError;
use crate::placeholder::placeholder_image;
use crate::raster::{DecodedImage, RequestedSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    Thumbnail,
    Preview,
}

/// One unit of work as submitted by a UI worker.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub path: PathBuf,
    pub side: i32,
    pub purpose: RequestPurpose,
}

impl DecodeRequest {
    pub fn thumbnail(path: impl Into<PathBuf>, size: i32) -> Self {
        Self {
            path: path.into(),
            side: size,
            purpose: RequestPurpose::Thumbnail,
        }
    }

    pub fn preview(path: impl Into<PathBuf>, max_side: i32) -> Self {
        Self {
            path: path.into(),
            side: max_side,
            purpose: RequestPurpose::Preview,
        }
    }
}

type InflightSlot = Arc<OnceCell<DecodedImage>>;

pub struct ImageService<D: SourceDecoder = DecodePipeline> {
    memory: MemoryCache,
    disk: DiskCache,
    decoder: D,
    inflight: Mutex<HashMap<CacheKey, InflightSlot>>,
}

impl ImageService<DecodePipeline> {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_decoder(config, DecodePipeline::new())
    }
}

impl<D: SourceDecoder> ImageService<D> {
    pub fn with_decoder(config: ServiceConfig, decoder: D) -> Self {
        let disk = DiskCache::new(config.disk_cache_dir);
        if let Err(err) = disk.ensure_dir() {
            warn!(
                dir = %disk.root().display(),
                code = err.code_str(),
                error = %err,
                "disk cache directory unavailable; disk tier will miss"
            );
        }
        Self {
            memory: MemoryCache::new(config.mem_cache_capacity),
            disk,
            decoder,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }

    pub fn get_thumbnail(&self, path: &Path, size: i32) -> DecodedImage {
        self.get_image(path, RequestedSide::from_px(size))
    }

    pub fn get_preview(&self, path: &Path, max_side: i32) -> DecodedImage {
        self.get_image(path, RequestedSide::from_px(max_side))
    }

    pub fn load(&self, request: &DecodeRequest) -> DecodedImage {
        match request.purpose {
            RequestPurpose::Thumbnail => self.get_thumbnail(&request.path, request.side),
            RequestPurpose::Preview => self.get_preview(&request.path, request.side),
        }
    }

    /// Never fails. Concurrent callers with the same key share one
    /// production run and each receive a copy of its result.
    pub fn get_image(&self, path: &Path, side: RequestedSide) -> DecodedImage {
        let key = CacheKey::derive(path, side);
        if let Some(img) = self.memory.get(&key) {
            return img;
        }

        let slot = {
            let mut inflight = self.inflight.lock();
            Arc::clone(
                inflight
                    .entry(key)
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };
        let _release = InflightRelease {
            inflight: &self.inflight,
            key,
            slot: Arc::clone(&slot),
        };
        let img = slot.get_or_init(|| self.produce(&key, path, side)).clone();
        img
    }

    fn produce(&self, key: &CacheKey, path: &Path, side: RequestedSide) -> DecodedImage {
        // A previous slot for this key may have finished between our miss and
        // taking the slot. Not counted: the caller already recorded the miss.
        if let Some(img) = self.memory.peek(key) {
            return img;
        }

        if let Some(img) = self.disk.lookup(key) {
            debug!(path = %path.display(), key = ?key, "disk hit");
            self.memory.put(*key, img.clone());
            return img;
        }

        match self.decoder.decode(path, side) {
            Some(img) => {
                if let Err(err) = self.disk.store(key, &img) {
                    warn!(
                        path = %path.display(),
                        key = ?key,
                        code = err.code_str(),
                        error = %err,
                        "disk cache write failed"
                    );
                }
                self.memory.put(*key, img.clone());
                img
            }
            None => {
                debug!(path = %path.display(), "no decoder produced an image; using placeholder");
                let img = placeholder_image();
                self.memory.put(*key, img.clone());
                img
            }
        }
    }
}

/// Drops the in-flight slot once its producer has returned or unwound, so a
/// panicking decoder does not leave the key pinned. A newer slot for the
/// same key is left alone.
struct InflightRelease<'a> {
    inflight: &'a Mutex<HashMap<CacheKey, InflightSlot>>,
    key: CacheKey,
    slot: InflightSlot,
}

impl Drop for InflightRelease<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock();
        if inflight
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            inflight.remove(&self.key);
        }
    }
}
