//! General image-codec reader: `image` for every format it knows, with a
//! DCT-scaled `jpeg-decoder` fast path for JPEG sources.

use std::fs;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;

use image::metadata::Orientation;
use image::{
    DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Limits, RgbImage,
};
use jpeg_decoder::{
    Decoder as JpegScaleDecoder, ImageInfo as JpegImageInfo, PixelFormat as JpegPixelFormat,
};
use tracing::debug;

use super::error::{DecodeError, DecodeErrorCode, DecodeResult};
use super::scale_to_bound;
use crate::raster::{fit_within, DecodedImage, ImageOrigin, RequestedSide};

const MAX_SOURCE_DIM: u32 = 20000;
const MAX_DECODE_BYTES: u64 = (MAX_SOURCE_DIM as u64) * (MAX_SOURCE_DIM as u64) * 4;

pub fn decode(path: &Path, side: RequestedSide) -> DecodeResult<DecodedImage> {
    let reader = ImageReader::open(path)
        .map_err(|e| DecodeError::from_io("Open failed", &e))?
        .with_guessed_format()
        .map_err(|e| DecodeError::from_external_message(format!("Failed to guess format: {e}")))?;
    let fmt = reader.format().ok_or_else(|| {
        DecodeError::new(DecodeErrorCode::UnsupportedFormat, "Unsupported image format")
    })?;

    let (img, orientation) = match (fmt, side.bound()) {
        (ImageFormat::Jpeg, Some(bound)) => match decode_jpeg_prescaled(path, bound) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!(
                    path = %path.display(),
                    error = %err,
                    "jpeg pre-scaled decode fell back to full decode"
                );
                decode_full(reader)?
            }
        },
        _ => decode_full(reader)?,
    };

    // The pre-scale only gets within a power of two of the target.
    let mut img = scale_to_bound(img, side);
    if let Some(orientation) = orientation {
        img.apply_orientation(orientation);
    }
    DecodedImage::from_dynamic(img, ImageOrigin::Decoded).ok_or_else(DecodeError::degenerate)
}

fn source_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIM);
    limits.max_image_height = Some(MAX_SOURCE_DIM);
    limits.max_alloc = Some(MAX_DECODE_BYTES);
    limits
}

fn check_declared(width: u32, height: u32) -> DecodeResult<()> {
    if width == 0 || height == 0 {
        return Err(DecodeError::degenerate());
    }
    if width > MAX_SOURCE_DIM || height > MAX_SOURCE_DIM {
        return Err(DecodeError::new(
            DecodeErrorCode::TooLarge,
            format!("Image dimensions too large for thumbnail ({width}x{height})"),
        ));
    }
    Ok(())
}

fn decode_full<R: BufRead + Seek>(
    mut reader: ImageReader<R>,
) -> DecodeResult<(DynamicImage, Option<Orientation>)> {
    reader.limits(source_limits());
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| DecodeError::from_external_message(format!("Decode failed: {e}")))?;
    let (w, h) = decoder.dimensions();
    check_declared(w, h)?;
    let orientation = decoder.orientation().ok();
    let img = DynamicImage::from_decoder(decoder)
        .map_err(|e| DecodeError::from_external_message(format!("Decode failed: {e}")))?;
    Ok((img, orientation))
}

/// Asks the JPEG decoder for the smallest DCT scale that still covers the
/// aspect-preserving target, so peak memory tracks the thumbnail size rather
/// than the source size.
fn decode_jpeg_prescaled(
    path: &Path,
    bound: u32,
) -> DecodeResult<(DynamicImage, Option<Orientation>)> {
    let file = fs::File::open(path).map_err(|e| DecodeError::from_io("Open failed", &e))?;
    let mut decoder = JpegScaleDecoder::new(BufReader::new(file));
    decoder.set_max_decoding_buffer_size(MAX_DECODE_BYTES.min(usize::MAX as u64) as usize);

    decoder.read_info().map_err(|e| {
        DecodeError::from_external_message(format!("JPEG scaled decode failed: {e}"))
    })?;
    let src_info = decoder.info().ok_or_else(|| {
        DecodeError::new(
            DecodeErrorCode::DecodeFailed,
            "JPEG scaled decode missing metadata",
        )
    })?;
    let (src_w, src_h) = (u32::from(src_info.width), u32::from(src_info.height));
    check_declared(src_w, src_h)?;

    let (target_w, target_h) = fit_within(src_w, src_h, bound);
    decoder
        .scale(
            target_w.clamp(1, u16::MAX as u32) as u16,
            target_h.clamp(1, u16::MAX as u32) as u16,
        )
        .map_err(|e| {
            DecodeError::from_external_message(format!("JPEG scaled decode setup failed: {e}"))
        })?;

    let pixels = decoder.decode().map_err(|e| {
        DecodeError::from_external_message(format!("JPEG scaled decode failed: {e}"))
    })?;
    let orientation = decoder.exif_data().and_then(Orientation::from_exif_chunk);
    let info = decoder.info().ok_or_else(|| {
        DecodeError::new(
            DecodeErrorCode::DecodeFailed,
            "JPEG scaled decode missing output metadata",
        )
    })?;
    let img = jpeg_pixels_to_dynamic_image(pixels, info)?;
    Ok((img, orientation))
}

fn jpeg_pixels_to_dynamic_image(
    pixels: Vec<u8>,
    info: JpegImageInfo,
) -> DecodeResult<DynamicImage> {
    let w = u32::from(info.width);
    let h = u32::from(info.height);
    let mismatch = || DecodeError::new(DecodeErrorCode::DecodeFailed, "JPEG buffer size mismatch");
    match info.pixel_format {
        JpegPixelFormat::RGB24 => RgbImage::from_raw(w, h, pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(mismatch),
        JpegPixelFormat::L8 => GrayImage::from_raw(w, h, pixels)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(mismatch),
        // CMYK and 16-bit grey go through the full `image` decode instead.
        JpegPixelFormat::L16 | JpegPixelFormat::CMYK32 => Err(DecodeError::new(
            DecodeErrorCode::UnsupportedFormat,
            format!(
                "JPEG scaled decode unsupported pixel format: {:?}",
                info.pixel_format
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    fn uniq_dir(label: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("photothumb-codec-test-{label}-{ts}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_image(path: &Path, w: u32, h: u32, fmt: ImageFormat) {
        let img = RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
            .save_with_format(path, fmt)
            .unwrap();
    }

    /// Baseline JPEG with a big-endian EXIF APP1 segment carrying only the
    /// Orientation tag, spliced in right after SOI.
    fn write_oriented_jpeg(path: &Path, w: u32, h: u32, orientation: u16) {
        use image::codecs::jpeg::JpegEncoder;
        use image::{ExtendedColorType, ImageEncoder};

        let img = RgbImage::from_fn(w, h, |x, _| image::Rgb([(x % 256) as u8, 40, 200]));
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, 90)
            .write_image(img.as_raw(), w, h, ExtendedColorType::Rgb8)
            .unwrap();

        let mut exif = b"Exif\0\0".to_vec();
        exif.extend_from_slice(b"MM\0\x2a");
        exif.extend_from_slice(&8u32.to_be_bytes());
        exif.extend_from_slice(&1u16.to_be_bytes());
        exif.extend_from_slice(&0x0112u16.to_be_bytes());
        exif.extend_from_slice(&3u16.to_be_bytes());
        exif.extend_from_slice(&1u32.to_be_bytes());
        exif.extend_from_slice(&orientation.to_be_bytes());
        exif.extend_from_slice(&[0, 0]);
        exif.extend_from_slice(&0u32.to_be_bytes());

        let mut bytes = encoded[..2].to_vec();
        bytes.extend_from_slice(&[0xff, 0xe1]);
        bytes.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        bytes.extend_from_slice(&exif);
        bytes.extend_from_slice(&encoded[2..]);
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn exif_rotation_is_applied_on_both_decode_paths() {
        let dir = uniq_dir("orientation");
        let path = dir.join("rotated.jpg");
        write_oriented_jpeg(&path, 400, 200, 6);

        let bounded = decode(&path, RequestedSide::Bounded(100)).unwrap();
        assert_eq!(bounded.dimensions(), (50, 100));
        let native = decode(&path, RequestedSide::Native).unwrap();
        assert_eq!(native.dimensions(), (200, 400));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn jpeg_is_bounded_and_keeps_aspect() {
        let dir = uniq_dir("jpeg");
        let path = dir.join("photo.jpg");
        write_image(&path, 1600, 1200, ImageFormat::Jpeg);
        let img = decode(&path, RequestedSide::Bounded(256)).unwrap();
        assert_eq!(img.dimensions(), (256, 192));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn png_is_bounded_after_full_decode() {
        let dir = uniq_dir("png");
        let path = dir.join("tall.png");
        write_image(&path, 300, 900, ImageFormat::Png);
        let img = decode(&path, RequestedSide::Bounded(90)).unwrap();
        assert_eq!(img.dimensions(), (30, 90));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn native_side_keeps_source_resolution() {
        let dir = uniq_dir("native");
        let path = dir.join("small.png");
        write_image(&path, 40, 20, ImageFormat::Png);
        let img = decode(&path, RequestedSide::Native).unwrap();
        assert_eq!(img.dimensions(), (40, 20));
        let img = decode(&path, RequestedSide::Bounded(512)).unwrap();
        assert_eq!(img.dimensions(), (40, 20));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn garbage_and_missing_files_fail_with_codes() {
        let dir = uniq_dir("garbage");
        let path = dir.join("broken.jpg");
        fs::write(&path, b"definitely not an image").unwrap();
        assert!(decode(&path, RequestedSide::Bounded(64)).is_err());

        let err = decode(&dir.join("missing.png"), RequestedSide::Bounded(64)).unwrap_err();
        assert_eq!(err.code(), DecodeErrorCode::OpenFailed);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn oversized_declarations_are_rejected() {
        assert_eq!(
            check_declared(MAX_SOURCE_DIM + 1, 10).unwrap_err().code(),
            DecodeErrorCode::TooLarge
        );
        assert_eq!(
            check_declared(0, 10).unwrap_err().code(),
            DecodeErrorCode::Degenerate
        );
        assert!(check_declared(4000, 3000).is_ok());
    }
}
