//! Flat grey stand-in used when every decode strategy fails, and the
//! heuristic that recognizes such images when they were persisted by older
//! builds.

use crate::raster::{DecodedImage, ImageOrigin};

pub const PLACEHOLDER_SIDE: u32 = 64;
pub const PLACEHOLDER_GREY: u8 = 220;
const GREY_TOLERANCE: u8 = 2;

pub fn placeholder_image() -> DecodedImage {
    DecodedImage::solid_rgb(
        PLACEHOLDER_SIDE,
        PLACEHOLDER_SIDE,
        [PLACEHOLDER_GREY; 3],
        ImageOrigin::Placeholder,
    )
}

/// True when `img` is exactly 64x64 and its top-left, center and
/// bottom-right pixels are all within 2 of RGB(220, 220, 220).
///
/// Known false positive: a genuine 64x64 photo that happens to be light grey
/// at those three points is classified as a placeholder and its disk entry is
/// evicted. Kept as-is for compatibility with caches written by earlier builds.
pub fn looks_like_placeholder(img: &DecodedImage) -> bool {
    if img.dimensions() != (PLACEHOLDER_SIDE, PLACEHOLDER_SIDE) {
        return false;
    }
    let last = PLACEHOLDER_SIDE - 1;
    let mid = PLACEHOLDER_SIDE / 2;
    [(0, 0), (mid, mid), (last, last)]
        .into_iter()
        .all(|(x, y)| img.rgb_at(x, y).is_some_and(is_placeholder_grey))
}

fn is_placeholder_grey(rgb: [u8; 3]) -> bool {
    rgb.iter()
        .all(|c| c.abs_diff(PLACEHOLDER_GREY) <= GREY_TOLERANCE)
}
