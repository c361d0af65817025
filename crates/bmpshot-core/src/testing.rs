//! Synthetic capture sources for unit tests.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bmpshot_platform::screen::{
    CaptureError, CursorLocator, CursorPosition, FrameCapturer, ScreenSnapshot, SnapshotGeometry,
};

use crate::encoder::Clock;

/// BGR colour of the pixel at (x, y), y counted from the top.
pub type Painter = fn(u32, u32) -> [u8; 3];

pub fn solid_red(_x: u32, _y: u32) -> [u8; 3] {
    [0, 0, 255]
}

/// Each visual row gets its own blue value.
pub fn row_gradient(_x: u32, y: u32) -> [u8; 3] {
    [y as u8, 0x40, 0x80]
}

pub struct SyntheticSnapshot {
    pub width: u32,
    pub height: u32,
    pub paint: Painter,
    /// Rows the surface hands back; `None` means all of them
    pub rows_available: Option<u32>,
}

impl SyntheticSnapshot {
    pub fn new(width: u32, height: u32, paint: Painter) -> Self {
        Self {
            width,
            height,
            paint,
            rows_available: None,
        }
    }
}

impl ScreenSnapshot for SyntheticSnapshot {
    fn geometry(&self) -> Result<SnapshotGeometry, CaptureError> {
        Ok(SnapshotGeometry {
            width: self.width,
            height: self.height,
            bits_per_pixel: 32,
        })
    }

    fn read_bgr24(&self, dst: &mut [u8], stride: usize) -> Result<u32, CaptureError> {
        let rows = self.rows_available.unwrap_or(self.height).min(self.height);
        for scan_line in 0..rows {
            let y = self.height - 1 - scan_line;
            let start = scan_line as usize * stride;
            let line = &mut dst[start..start + self.width as usize * 3];
            for (x, px) in line.chunks_exact_mut(3).enumerate() {
                px.copy_from_slice(&(self.paint)(x as u32, y));
            }
        }
        Ok(rows)
    }
}

/// Capturer producing painted snapshots at a fixed cursor position.
pub struct SyntheticCapturer {
    pub paint: Painter,
    pub cursor: CursorPosition,
    /// Snapshot geometry override, to simulate a mismatched surface
    pub surface_size: Option<(u32, u32)>,
    pub captures: AtomicU32,
}

impl SyntheticCapturer {
    pub fn new(paint: Painter, cursor: CursorPosition) -> Self {
        Self {
            paint,
            cursor,
            surface_size: None,
            captures: AtomicU32::new(0),
        }
    }
}

impl CursorLocator for SyntheticCapturer {
    fn cursor_position(&self) -> Result<CursorPosition, CaptureError> {
        Ok(self.cursor)
    }
}

impl FrameCapturer for SyntheticCapturer {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn capture(&self, width: u32, height: u32) -> Result<Box<dyn ScreenSnapshot>, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let (width, height) = self.surface_size.unwrap_or((width, height));
        Ok(Box::new(SyntheticSnapshot::new(width, height, self.paint)))
    }
}

/// Capturer whose display is never available.
pub struct NoDisplay;

impl CursorLocator for NoDisplay {
    fn cursor_position(&self) -> Result<CursorPosition, CaptureError> {
        Err(CaptureError::Acquisition("no display".into()))
    }
}

impl FrameCapturer for NoDisplay {
    fn name(&self) -> &'static str {
        "none"
    }

    fn capture(&self, _width: u32, _height: u32) -> Result<Box<dyn ScreenSnapshot>, CaptureError> {
        Err(CaptureError::Acquisition("GetDC returned null".into()))
    }
}

pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.0
    }
}

/// Advances by one millisecond per reading.
pub struct StepClock(pub AtomicU64);

impl StepClock {
    pub fn starting_at(ms: u64) -> Self {
        Self(AtomicU64::new(ms))
    }
}

impl Clock for StepClock {
    fn now_millis(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}
