//! Windows screen capture using GDI.
//! The desktop DC is blitted into a compatible bitmap, which is read back with
//! `GetDIBits` as bottom-up 24-bit rows.

use std::ffi::c_void;
use std::mem::size_of;

use anyhow::Result;
use bmpshot_platform::screen::{
    CaptureError, CursorLocator, CursorPosition, FrameCapturer, ScreenSnapshot, SnapshotGeometry,
};
use tracing::{debug, info};

use windows::Win32::Foundation::{HWND, POINT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    GetObjectW, ReleaseDC, SelectObject, BITMAP, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    CAPTUREBLT, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, HGDI_ERROR, ROP_CODE, SRCCOPY,
};
use windows::Win32::UI::WindowsAndMessaging::{GetCursorPos, GetDesktopWindow};

/// Desktop window DC, released on drop
struct DesktopDc {
    hwnd: HWND,
    hdc: HDC,
}

impl DesktopDc {
    fn acquire() -> Result<Self, CaptureError> {
        let hwnd = unsafe { GetDesktopWindow() };
        let hdc = unsafe { GetDC(hwnd) };
        if hdc.is_invalid() {
            return Err(CaptureError::Acquisition(
                "GetDC(desktop window) returned null".into(),
            ));
        }
        Ok(Self { hwnd, hdc })
    }
}

impl Drop for DesktopDc {
    fn drop(&mut self) {
        unsafe {
            let _ = ReleaseDC(self.hwnd, self.hdc);
        }
    }
}

/// Memory DC, deleted on drop
struct MemoryDc(HDC);

impl MemoryDc {
    fn compatible_with(screen: &DesktopDc) -> Result<Self, CaptureError> {
        let hdc = unsafe { CreateCompatibleDC(screen.hdc) };
        if hdc.is_invalid() {
            return Err(CaptureError::Allocation("CreateCompatibleDC failed".into()));
        }
        Ok(Self(hdc))
    }
}

impl Drop for MemoryDc {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteDC(self.0);
        }
    }
}

/// Puts the DC's previous object back on drop, so the bitmap is never left
/// selected when the DC goes away.
struct Selection<'a> {
    dc: &'a MemoryDc,
    previous: HGDIOBJ,
}

impl<'a> Selection<'a> {
    fn select(dc: &'a MemoryDc, bitmap: HBITMAP) -> Result<Self, CaptureError> {
        let previous = unsafe { SelectObject(dc.0, HGDIOBJ(bitmap.0)) };
        if selection_failed(previous) {
            return Err(CaptureError::Allocation(
                "SelectObject(capture bitmap) failed".into(),
            ));
        }
        Ok(Self { dc, previous })
    }
}

/// `SelectObject` reports failure as either NULL or `HGDI_ERROR`
fn selection_failed(previous: HGDIOBJ) -> bool {
    previous.is_invalid() || previous == HGDI_ERROR
}

impl Drop for Selection<'_> {
    fn drop(&mut self) {
        unsafe {
            let _ = SelectObject(self.dc.0, self.previous);
        }
    }
}

/// Off-screen copy of the desktop. Owns the GDI bitmap.
pub struct GdiSnapshot {
    bitmap: HBITMAP,
}

impl Drop for GdiSnapshot {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteObject(HGDIOBJ(self.bitmap.0));
        }
    }
}

impl GdiSnapshot {
    fn describe(&self) -> Result<BITMAP, CaptureError> {
        let mut bm = BITMAP::default();
        let copied = unsafe {
            GetObjectW(
                HGDIOBJ(self.bitmap.0),
                size_of::<BITMAP>() as i32,
                Some(&mut bm as *mut BITMAP as *mut c_void),
            )
        };
        if copied == 0 {
            return Err(CaptureError::Extraction("GetObject(bitmap) failed".into()));
        }
        Ok(bm)
    }
}

impl ScreenSnapshot for GdiSnapshot {
    fn geometry(&self) -> Result<SnapshotGeometry, CaptureError> {
        let bm = self.describe()?;
        Ok(SnapshotGeometry {
            width: bm.bmWidth.max(0) as u32,
            height: bm.bmHeight.max(0) as u32,
            bits_per_pixel: bm.bmBitsPixel,
        })
    }

    fn read_bgr24(&self, dst: &mut [u8], stride: usize) -> Result<u32, CaptureError> {
        let bm = self.describe()?;
        let rows = bm.bmHeight.max(0) as u32;
        if dst.len() < stride * rows as usize {
            return Err(CaptureError::Extraction(format!(
                "destination holds {} bytes, {} rows of {} needed",
                dst.len(),
                rows,
                stride
            )));
        }

        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: bm.bmWidth,
                // positive height: scan line 0 is the bottom row
                biHeight: bm.bmHeight,
                biPlanes: 1,
                biBitCount: 24,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        // GetDIBits needs a DC but the bitmap must not be selected into one
        let screen = DesktopDc::acquire()?;
        let copied = unsafe {
            GetDIBits(
                screen.hdc,
                self.bitmap,
                0,
                rows,
                Some(dst.as_mut_ptr() as *mut c_void),
                &mut info,
                DIB_RGB_COLORS,
            )
        };
        if copied <= 0 {
            return Err(CaptureError::Extraction("GetDIBits copied no rows".into()));
        }
        Ok(copied as u32)
    }
}

/// GDI desktop capturer. Each capture acquires and releases its own DCs, so
/// one instance can serve several workers at once.
#[derive(Default)]
pub struct GdiScreenCapture;

impl GdiScreenCapture {
    pub fn new() -> Self {
        Self
    }
}

impl CursorLocator for GdiScreenCapture {
    fn cursor_position(&self) -> Result<CursorPosition, CaptureError> {
        let mut point = POINT::default();
        unsafe { GetCursorPos(&mut point) }
            .map_err(|e| CaptureError::Acquisition(format!("GetCursorPos: {}", e)))?;
        Ok(CursorPosition {
            x: point.x,
            y: point.y,
        })
    }
}

impl FrameCapturer for GdiScreenCapture {
    fn name(&self) -> &'static str {
        "gdi"
    }

    fn capture(&self, width: u32, height: u32) -> Result<Box<dyn ScreenSnapshot>, CaptureError> {
        let (w, h) = match (i32::try_from(width), i32::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(CaptureError::Allocation(format!(
                    "{}x{} exceeds GDI limits",
                    width, height
                )))
            }
        };

        let screen = DesktopDc::acquire()?;
        let memory = MemoryDc::compatible_with(&screen)?;

        let bitmap = unsafe { CreateCompatibleBitmap(screen.hdc, w, h) };
        if bitmap.is_invalid() {
            return Err(CaptureError::Allocation(format!(
                "CreateCompatibleBitmap({}x{}) failed",
                width, height
            )));
        }
        // owns the bitmap from here on, including on the error paths below
        let snapshot = GdiSnapshot { bitmap };

        {
            let _selected = Selection::select(&memory, snapshot.bitmap)?;
            unsafe {
                BitBlt(
                    memory.0,
                    0,
                    0,
                    w,
                    h,
                    screen.hdc,
                    0,
                    0,
                    ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0),
                )
            }
            .map_err(|e| CaptureError::BlockCopy(format!("BitBlt: {}", e)))?;
        }

        debug!("captured {}x{} desktop rectangle", width, height);
        Ok(Box::new(snapshot))
    }
}

/// Factory function for creating the frame capturer on Windows
pub fn create_frame_capturer() -> Result<Box<dyn FrameCapturer>> {
    info!("using GDI BitBlt for screen capture");
    Ok(Box::new(GdiScreenCapture::new()))
}
