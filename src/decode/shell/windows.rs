use std::ffi::c_void;
use std::mem::size_of;
use std::path::Path;

use tracing::debug;
use windows::{
    core::HSTRING,
    Win32::{
        Foundation::{RPC_E_CHANGED_MODE, S_OK, SIZE},
        Graphics::Gdi::{
            CreateCompatibleDC, DeleteDC, DeleteObject, GetDIBits, GetObjectW, BITMAP,
            BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ,
        },
        System::Com::{CoInitializeEx, CoUninitialize, COINIT_APARTMENTTHREADED},
        UI::Shell::{
            IShellItemImageFactory, SHCreateItemFromParsingName, SIIGBF, SIIGBF_BIGGERSIZEOK,
            SIIGBF_RESIZETOFIT, SIIGBF_SCALEUP, SIIGBF_THUMBNAILONLY,
        },
    },
};

use super::{bgra_top_down_to_rgb, candidate_sizes};
use crate::decode::error::{DecodeError, DecodeErrorCode, DecodeResult};
use crate::decode::scale_to_bound;
use crate::raster::{DecodedImage, ImageOrigin, RequestedSide};

/// Thumbnail-only first; some handlers refuse that for their file type, so
/// the second variant lets the provider fall back to an icon-backed image.
const FLAG_VARIANTS: [SIIGBF; 2] = [
    SIIGBF(
        SIIGBF_RESIZETOFIT.0 | SIIGBF_THUMBNAILONLY.0 | SIIGBF_BIGGERSIZEOK.0 | SIIGBF_SCALEUP.0,
    ),
    SIIGBF(SIIGBF_RESIZETOFIT.0 | SIIGBF_BIGGERSIZEOK.0 | SIIGBF_SCALEUP.0),
];

pub(super) fn thumbnail(path: &Path, side: RequestedSide) -> DecodeResult<DecodedImage> {
    let _com_guard = ComGuard::new().map_err(|e| {
        DecodeError::new(
            DecodeErrorCode::PlatformFailed,
            format!("Failed to initialize COM: {e}"),
        )
    })?;
    // Declared after the guard so the interface is released before COM is torn down.
    let factory: IShellItemImageFactory =
        unsafe { SHCreateItemFromParsingName(&HSTRING::from(path.as_os_str()), None) }.map_err(
            |e| {
                DecodeError::new(
                    DecodeErrorCode::PlatformFailed,
                    format!("Failed to create shell item for {}: {e}", path.display()),
                )
            },
        )?;

    let mut last_err = None;
    for px in candidate_sizes(side) {
        for flags in FLAG_VARIANTS {
            match unsafe { fetch_image(&factory, px, flags) } {
                Ok(img) => return Ok(bound_result(img, side)),
                Err(e) => {
                    debug!(
                        path = %path.display(),
                        request_px = px,
                        flags = flags.0,
                        error = %e,
                        "shell GetImage attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        DecodeError::new(DecodeErrorCode::PlatformFailed, "Shell thumbnail unavailable")
    }))
}

/// The provider may hand back up to the normalized request size.
fn bound_result(img: DecodedImage, side: RequestedSide) -> DecodedImage {
    let Some(dynamic) = img.to_dynamic() else {
        return img;
    };
    DecodedImage::from_dynamic(scale_to_bound(dynamic, side), ImageOrigin::Decoded).unwrap_or(img)
}

unsafe fn fetch_image(
    factory: &IShellItemImageFactory,
    px: u32,
    flags: SIIGBF,
) -> DecodeResult<DecodedImage> {
    let size = SIZE {
        cx: px as i32,
        cy: px as i32,
    };
    let hbm = factory.GetImage(size, flags).map_err(|e| {
        DecodeError::new(
            DecodeErrorCode::PlatformFailed,
            format!("Shell GetImage failed: {e}"),
        )
    })?;
    if hbm.is_invalid() {
        return Err(DecodeError::new(
            DecodeErrorCode::PlatformFailed,
            "Shell GetImage returned a null HBITMAP",
        ));
    }
    let bitmap = BitmapGuard(hbm);
    read_bitmap(&bitmap)
}

/// Reads the bitmap back as top-down 32-bit BGRA through a memory DC.
unsafe fn read_bitmap(bitmap: &BitmapGuard) -> DecodeResult<DecodedImage> {
    let mut bm = BITMAP::default();
    let got = GetObjectW(
        bitmap.as_gdi(),
        size_of::<BITMAP>() as i32,
        Some(&mut bm as *mut BITMAP as *mut c_void),
    );
    if got == 0 {
        return Err(DecodeError::new(
            DecodeErrorCode::PlatformFailed,
            "GetObject failed on shell HBITMAP",
        ));
    }
    let width = bm.bmWidth;
    let height = bm.bmHeight.abs();
    if width <= 0 || height <= 0 {
        return Err(DecodeError::degenerate());
    }

    let mut info = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width,
            biHeight: -height,
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        },
        ..Default::default()
    };

    let dc = CreateCompatibleDC(None);
    if dc.is_invalid() {
        return Err(DecodeError::new(
            DecodeErrorCode::PlatformFailed,
            "CreateCompatibleDC failed",
        ));
    }
    let dc = DcGuard(dc);

    // 32bpp rows are already DWORD aligned.
    let row_bytes = width as usize * 4;
    let mut buf = vec![0u8; row_bytes * height as usize];
    let lines = GetDIBits(
        dc.0,
        bitmap.0,
        0,
        height as u32,
        Some(buf.as_mut_ptr() as *mut c_void),
        &mut info,
        DIB_RGB_COLORS,
    );
    if lines == 0 {
        return Err(DecodeError::new(
            DecodeErrorCode::PlatformFailed,
            "GetDIBits failed on shell HBITMAP",
        ));
    }

    bgra_top_down_to_rgb(&buf, width as u32, height as u32, row_bytes)
        .ok_or_else(DecodeError::degenerate)
}

struct BitmapGuard(HBITMAP);

impl BitmapGuard {
    fn as_gdi(&self) -> HGDIOBJ {
        HGDIOBJ(self.0 .0)
    }
}

impl Drop for BitmapGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteObject(self.as_gdi());
        }
    }
}

struct DcGuard(HDC);

impl Drop for DcGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteDC(self.0);
        }
    }
}

/// Per-call apartment scope. Only uninitializes what this call initialized.
struct ComGuard {
    should_uninit: bool,
}

impl ComGuard {
    fn new() -> Result<Self, windows::core::Error> {
        unsafe {
            let hr = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
            if hr == S_OK {
                Ok(Self {
                    should_uninit: true,
                })
            } else if hr == RPC_E_CHANGED_MODE {
                Ok(Self {
                    should_uninit: false,
                })
            } else if hr.is_ok() {
                Ok(Self {
                    should_uninit: true,
                })
            } else {
                Err(hr.into())
            }
        }
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
