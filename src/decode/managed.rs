//! HEIF-capable decoder backed by libheif. Compiled in with the `heif`
//! cargo feature; without it the strategy reports itself unavailable and the
//! pipeline moves on.

use std::path::Path;

use super::error::DecodeResult;
use crate::raster::{DecodedImage, RequestedSide};

pub fn is_available() -> bool {
    cfg!(feature = "heif")
}

#[cfg(feature = "heif")]
pub fn decode(path: &Path, side: RequestedSide) -> DecodeResult<DecodedImage> {
    heif::decode(path, side)
}

#[cfg(not(feature = "heif"))]
pub fn decode(path: &Path, _side: RequestedSide) -> DecodeResult<DecodedImage> {
    Err(super::error::DecodeError::unavailable(format!(
        "HEIF decoder not compiled in: {}",
        path.display()
    )))
}

#[cfg(feature = "heif")]
mod heif {
    use std::path::Path;

    use image::{DynamicImage, RgbImage, RgbaImage};
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    use super::super::error::{DecodeError, DecodeErrorCode, DecodeResult};
    use super::super::scale_to_bound;
    use crate::raster::{DecodedImage, ImageOrigin, RequestedSide};

    pub(super) fn decode(path: &Path, side: RequestedSide) -> DecodeResult<DecodedImage> {
        let path_str = path.to_str().ok_or_else(|| {
            DecodeError::new(DecodeErrorCode::OpenFailed, "HEIF open failed: non-UTF-8 path")
        })?;
        let ctx = HeifContext::read_from_file(path_str)
            .map_err(|e| DecodeError::new(DecodeErrorCode::OpenFailed, format!("HEIF open failed: {e}")))?;
        let handle = ctx.primary_image_handle().map_err(|e| {
            DecodeError::from_external_message(format!("HEIF decode failed: {e}"))
        })?;
        let has_alpha = handle.has_alpha_channel();
        let chroma = if has_alpha {
            RgbChroma::Rgba
        } else {
            RgbChroma::Rgb
        };

        // libheif applies the container's rotation/mirror transforms here.
        let lib = LibHeif::new();
        let image = lib
            .decode(&handle, ColorSpace::Rgb(chroma), None)
            .map_err(|e| DecodeError::from_external_message(format!("HEIF decode failed: {e}")))?;
        let planes = image.planes();
        let plane = planes.interleaved.ok_or_else(|| {
            DecodeError::new(DecodeErrorCode::DecodeFailed, "HEIF decode produced no interleaved plane")
        })?;

        let (width, height) = (plane.width, plane.height);
        if width == 0 || height == 0 {
            return Err(DecodeError::degenerate());
        }
        let bpp = if has_alpha { 4 } else { 3 };
        let row = width as usize * bpp;
        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * plane.stride;
            let line = plane.data.get(start..start + row).ok_or_else(|| {
                DecodeError::new(DecodeErrorCode::DecodeFailed, "HEIF plane shorter than declared")
            })?;
            pixels.extend_from_slice(line);
        }

        let img = if has_alpha {
            RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8)
        } else {
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        .ok_or_else(|| DecodeError::new(DecodeErrorCode::DecodeFailed, "HEIF buffer size mismatch"))?;

        let img = scale_to_bound(img, side);
        DecodedImage::from_dynamic(img, ImageOrigin::Decoded).ok_or_else(DecodeError::degenerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_follows_feature() {
        assert_eq!(is_available(), cfg!(feature = "heif"));
    }

    #[cfg(not(feature = "heif"))]
    #[test]
    fn reports_unavailable_without_plugin() {
        let err = decode(Path::new("/photos/a.heic"), RequestedSide::Bounded(256)).unwrap_err();
        assert_eq!(err.code(), super::super::error::DecodeErrorCode::Unavailable);
    }
}
