//! Owned raster images handed between the cache tiers and the decoders.

use image::{DynamicImage, GenericImageView, RgbImage, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// Generation tag: where the pixels came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Decoded,
    Placeholder,
}

/// Pixel bound requested by a caller. `Native` keeps the source resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestedSide {
    Native,
    Bounded(u32),
}

impl RequestedSide {
    /// Zero and negative values mean "no scaling".
    pub fn from_px(px: i32) -> Self {
        if px <= 0 {
            Self::Native
        } else {
            Self::Bounded(px as u32)
        }
    }

    pub fn as_px(self) -> u32 {
        match self {
            Self::Native => 0,
            Self::Bounded(px) => px,
        }
    }

    pub fn bound(self) -> Option<u32> {
        match self {
            Self::Native => None,
            Self::Bounded(px) => Some(px),
        }
    }
}

/// Fit `(width, height)` inside a `bound`-sided square, keeping the aspect
/// ratio. Never upsamples; the shorter edge is at least one pixel.
pub fn fit_within(width: u32, height: u32, bound: u32) -> (u32, u32) {
    if width == 0 || height == 0 || bound == 0 {
        return (width, height);
    }
    let longest = width.max(height);
    if longest <= bound {
        return (width, height);
    }
    let scale = bound as f64 / longest as f64;
    let scaled = |edge: u32| -> u32 {
        if edge == longest {
            bound
        } else {
            ((edge as f64 * scale).round() as u32).clamp(1, bound)
        }
    };
    (scaled(width), scaled(height))
}

/// A fully decoded, owned pixel buffer, tightly packed, top-down rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    origin: ImageOrigin,
}

impl DecodedImage {
    /// Returns `None` for zero-sized images or a buffer that does not match
    /// the dimensions.
    pub fn from_raw(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        origin: ImageOrigin,
    ) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(format.bytes_per_pixel())?;
        if pixels.len() != expected {
            return None;
        }
        Some(Self {
            pixels,
            width,
            height,
            format,
            origin,
        })
    }

    /// Single-color RGB image; each dimension is at least one pixel.
    pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3], origin: ImageOrigin) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            pixels,
            width,
            height,
            format: PixelFormat::Rgb8,
            origin,
        }
    }

    /// Normalizes any `image` color type to RGB8 or RGBA8, keeping alpha only
    /// when the source has it.
    pub fn from_dynamic(img: DynamicImage, origin: ImageOrigin) -> Option<Self> {
        let (width, height) = img.dimensions();
        if img.color().has_alpha() {
            let rgba = img.into_rgba8();
            Self::from_raw(rgba.into_raw(), width, height, PixelFormat::Rgba8, origin)
        } else {
            let rgb = img.into_rgb8();
            Self::from_raw(rgb.into_raw(), width, height, PixelFormat::Rgb8, origin)
        }
    }

    pub fn to_dynamic(&self) -> Option<DynamicImage> {
        match self.format {
            PixelFormat::Rgb8 => RgbImage::from_raw(self.width, self.height, self.pixels.clone())
                .map(DynamicImage::ImageRgb8),
            PixelFormat::Rgba8 => {
                RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
                    .map(DynamicImage::ImageRgba8)
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin == ImageOrigin::Placeholder
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// RGB triple at `(x, y)`, alpha dropped.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let idx = (y as usize * self.width as usize + x as usize) * bpp;
        let px = self.pixels.get(idx..idx + 3)?;
        Some([px[0], px[1], px[2]])
    }
}
