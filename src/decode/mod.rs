//! Ordered decode strategies. Each strategy gets one attempt per request;
//! the first non-degenerate image wins and every failure is swallowed here
//! so callers only ever see "image" or "nothing".

mod codec;
pub mod error;
mod managed;
mod shell;

use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

use crate::errors::domain::DomainError;
use crate::raster::{fit_within, DecodedImage, RequestedSide};
use error::{DecodeError, DecodeResult};

/// Anything that can turn a source path into pixels. The service is generic
/// over this so tests can count or script decodes.
pub trait SourceDecoder: Send + Sync {
    fn decode(&self, path: &Path, side: RequestedSide) -> Option<DecodedImage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    Heif,
    Video,
    Raster,
}

const HEIF_EXTENSIONS: &[&str] = &["heic", "heif", "hif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm", "mkv", "avi", "wmv", "mts"];

/// Classification is by name only; the source is never opened here.
pub fn format_class(path: &Path) -> FormatClass {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let Some(ext) = ext else {
        return FormatClass::Raster;
    };
    if HEIF_EXTENSIONS.contains(&ext.as_str()) {
        return FormatClass::Heif;
    }
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return FormatClass::Video;
    }
    let is_video = mime_guess::from_ext(&ext)
        .iter()
        .any(|m| m.type_() == mime::VIDEO);
    if is_video {
        FormatClass::Video
    } else {
        FormatClass::Raster
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Managed,
    Codec,
    Shell,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::Codec => "codec",
            Self::Shell => "shell",
        }
    }

    fn try_decode(self, path: &Path, side: RequestedSide) -> DecodeResult<DecodedImage> {
        match self {
            Self::Managed => managed::decode(path, side),
            Self::Codec => codec::decode(path, side),
            Self::Shell => shell::decode(path, side),
        }
    }
}

/// The production decoder: HEIF plugin, general codec, then platform shell.
#[derive(Debug, Clone, Copy)]
pub struct DecodePipeline {
    heif_plugin: bool,
    shell_provider: bool,
}

impl Default for DecodePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodePipeline {
    pub fn new() -> Self {
        Self::with_availability(managed::is_available(), shell::is_available())
    }

    pub fn with_availability(heif_plugin: bool, shell_provider: bool) -> Self {
        Self {
            heif_plugin,
            shell_provider,
        }
    }

    /// Strategies to try for one source, in order.
    pub fn plan(&self, class: FormatClass) -> Vec<Strategy> {
        let mut steps = Vec::with_capacity(3);
        match class {
            FormatClass::Heif if self.heif_plugin => steps.push(Strategy::Managed),
            // The general codec has no video support; go straight to the shell.
            FormatClass::Video => {}
            FormatClass::Heif | FormatClass::Raster => steps.push(Strategy::Codec),
        }
        if self.shell_provider {
            steps.push(Strategy::Shell);
        }
        steps
    }

    pub fn decode_with_report(
        &self,
        path: &Path,
        side: RequestedSide,
    ) -> Result<(Strategy, DecodedImage), Vec<(Strategy, DecodeError)>> {
        let class = format_class(path);
        let mut failures = Vec::new();
        for strategy in self.plan(class) {
            match strategy.try_decode(path, side) {
                Ok(img) if img.width() > 0 && img.height() > 0 => return Ok((strategy, img)),
                Ok(_) => failures.push((strategy, DecodeError::degenerate())),
                Err(err) => {
                    debug!(
                        path = %path.display(),
                        strategy = strategy.name(),
                        code = err.code_str(),
                        error = %err,
                        "decode strategy failed"
                    );
                    failures.push((strategy, err));
                }
            }
        }
        Err(failures)
    }
}

impl SourceDecoder for DecodePipeline {
    fn decode(&self, path: &Path, side: RequestedSide) -> Option<DecodedImage> {
        match self.decode_with_report(path, side) {
            Ok((strategy, img)) => {
                debug!(
                    path = %path.display(),
                    strategy = strategy.name(),
                    width = img.width(),
                    height = img.height(),
                    "decoded source"
                );
                Some(img)
            }
            Err(failures) => {
                debug!(
                    path = %path.display(),
                    attempts = failures.len(),
                    "all decode strategies failed"
                );
                None
            }
        }
    }
}

/// Downscales so the longer edge equals the bound. Never upsamples: a source
/// already within the bound comes back at its own size rather than being
/// stretched to fill it, so callers wanting a fixed display size scale up
/// themselves.
pub(crate) fn scale_to_bound(img: DynamicImage, side: RequestedSide) -> DynamicImage {
    let Some(bound) = side.bound() else {
        return img;
    };
    let (w, h) = (img.width(), img.height());
    if w.max(h) <= bound {
        return img;
    }
    let (tw, th) = fit_within(w, h, bound);
    img.resize_exact(tw, th, FilterType::Lanczos3)
}
