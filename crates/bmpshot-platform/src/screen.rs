use thiserror::Error;

/// Failures raised by a capture backend.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No display surface or drawing context could be obtained
    #[error("cannot acquire display surface: {0}")]
    Acquisition(String),
    /// The off-screen surface or a pixel buffer could not be allocated
    #[error("allocation failed: {0}")]
    Allocation(String),
    /// Copying the screen rectangle into the off-screen surface failed
    #[error("block copy failed: {0}")]
    BlockCopy(String),
    /// Pixel data could not be read back from a snapshot
    #[error("pixel extraction failed: {0}")]
    Extraction(String),
}

/// Actual pixel geometry of a captured surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotGeometry {
    pub width: u32,
    pub height: u32,
    /// Native colour depth of the surface, before conversion to 24 bpp
    pub bits_per_pixel: u16,
}

/// Cursor location in screen coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorPosition {
    pub x: i32,
    pub y: i32,
}

/// An off-screen copy of the screen, owned by whoever called
/// [`FrameCapturer::capture`]. Backend resources are released on drop.
pub trait ScreenSnapshot {
    /// Query the geometry stored in the surface itself.
    fn geometry(&self) -> Result<SnapshotGeometry, CaptureError>;

    /// Copy the surface into `dst` as bottom-up 24-bit BGR rows of `stride`
    /// bytes each (scan line 0 is the lowest row of the image).
    ///
    /// Returns the number of rows written.
    fn read_bgr24(&self, dst: &mut [u8], stride: usize) -> Result<u32, CaptureError>;
}

pub trait CursorLocator {
    fn cursor_position(&self) -> Result<CursorPosition, CaptureError>;
}

pub trait FrameCapturer: CursorLocator + Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Copy the `width` x `height` rectangle anchored at the screen origin
    /// into a new off-screen surface.
    fn capture(&self, width: u32, height: u32) -> Result<Box<dyn ScreenSnapshot>, CaptureError>;
}
