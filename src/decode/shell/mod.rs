//! Platform shell thumbnail provider. Implemented on Windows through
//! `IShellItemImageFactory`; other platforms have no equivalent and the
//! strategy is left out of the pipeline there.

#[cfg(windows)]
mod windows;

use std::path::Path;

use super::error::DecodeResult;
use crate::raster::{DecodedImage, ImageOrigin, PixelFormat, RequestedSide};

/// Request size used for `Native` requests.
const NATIVE_REQUEST_PX: u32 = 1024;

pub fn is_available() -> bool {
    cfg!(windows)
}

/// The provider is stable at the sizes OS thumbnail caches use, so requests
/// are normalized to 512 or 1024 and the other size is tried second.
pub fn candidate_sizes(side: RequestedSide) -> [u32; 2] {
    let requested = side.bound().unwrap_or(NATIVE_REQUEST_PX);
    if requested <= 512 {
        [512, 1024]
    } else {
        [1024, 512]
    }
}

#[cfg(windows)]
pub fn decode(path: &Path, side: RequestedSide) -> DecodeResult<DecodedImage> {
    windows::thumbnail(path, side)
}

#[cfg(not(windows))]
pub fn decode(path: &Path, _side: RequestedSide) -> DecodeResult<DecodedImage> {
    Err(super::error::DecodeError::unavailable(format!(
        "No shell thumbnail provider on this platform: {}",
        path.display()
    )))
}

/// Converts a top-down 32-bit BGRA buffer with `row_bytes` stride into an
/// RGB image. Alpha is dropped: GDI leaves it zero for opaque bitmaps.
pub(crate) fn bgra_top_down_to_rgb(
    buf: &[u8],
    width: u32,
    height: u32,
    row_bytes: usize,
) -> Option<DecodedImage> {
    if width == 0 || height == 0 || row_bytes < width as usize * 4 {
        return None;
    }
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height as usize {
        let start = y.checked_mul(row_bytes)?;
        let row = buf.get(start..start + width as usize * 4)?;
        for px in row.chunks_exact(4) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }
    DecodedImage::from_raw(rgb, width, height, PixelFormat::Rgb8, ImageOrigin::Decoded)
}
