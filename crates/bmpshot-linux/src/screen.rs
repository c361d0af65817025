//! Screen capture backend selection for Linux.

use anyhow::{Result, bail};
use bmpshot_platform::screen::FrameCapturer;

pub use crate::screen_x11::X11ScreenCapture;

/// Detect the display server and return the matching FrameCapturer.
pub fn create_frame_capturer() -> Result<Box<dyn FrameCapturer>> {
    // DISPLAY covers both X11 and XWayland
    if std::env::var("DISPLAY").is_ok() {
        tracing::info!("detected X11 display, using xcb screen capture");
        return Ok(Box::new(X11ScreenCapture::connect()?));
    }

    if std::env::var("WAYLAND_DISPLAY").is_ok() {
        bail!("Wayland sessions without XWayland are not supported; set DISPLAY to an X server");
    }

    bail!("no display server detected; set DISPLAY for X11");
}
