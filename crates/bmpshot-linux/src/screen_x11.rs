//! X11 screen capture using xcb `GetImage` on the root window, with the
//! cursor composited from XFixes when the server supports it.

use anyhow::{Context, Result};
use bmpshot_platform::screen::{
    CaptureError, CursorLocator, CursorPosition, FrameCapturer, ScreenSnapshot, SnapshotGeometry,
};
use tracing::debug;
use xcb::{x, xfixes};

use crate::pixels::{self, CursorSprite, PixelLayout};

/// Root window contents copied out of the X server (top-down BGRX)
pub struct X11Snapshot {
    width: u32,
    height: u32,
    bits_per_pixel: u8,
    pixels: Vec<u8>,
}

impl ScreenSnapshot for X11Snapshot {
    fn geometry(&self) -> Result<SnapshotGeometry, CaptureError> {
        Ok(SnapshotGeometry {
            width: self.width,
            height: self.height,
            bits_per_pixel: self.bits_per_pixel as u16,
        })
    }

    fn read_bgr24(&self, dst: &mut [u8], stride: usize) -> Result<u32, CaptureError> {
        if dst.len() < stride * self.height as usize {
            return Err(CaptureError::Extraction(format!(
                "destination holds {} bytes, {} rows of {} needed",
                dst.len(),
                self.height,
                stride
            )));
        }
        Ok(pixels::bgrx_to_bottom_up_bgr24(
            &self.pixels,
            self.width,
            self.height,
            dst,
            stride,
        ))
    }
}

/// X11 screen capture over a single xcb connection. xcb serialises requests
/// internally, so concurrent workers can share it.
pub struct X11ScreenCapture {
    conn: xcb::Connection,
    root: x::Window,
    screen_width: u16,
    screen_height: u16,
    layout: PixelLayout,
    xfixes: bool,
}

// SAFETY: xcb::Connection is thread-safe; the struct holds no raw pointers
unsafe impl Send for X11ScreenCapture {}
unsafe impl Sync for X11ScreenCapture {}

impl X11ScreenCapture {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) =
            xcb::Connection::connect_with_extensions(None, &[], &[xcb::Extension::XFixes])
                .context("failed to connect to X11 display")?;

        let (root, screen_width, screen_height, layout) = {
            let setup = conn.get_setup();
            let screen = setup
                .roots()
                .nth(screen_num as usize)
                .context("no X11 screen found")?;
            let depth = screen.root_depth();
            let visual = screen
                .allowed_depths()
                .flat_map(|d| d.visuals())
                .find(|v| v.visual_id() == screen.root_visual())
                .context("root visual not found")?;
            let format = setup
                .pixmap_formats()
                .iter()
                .find(|f| f.depth() == depth)
                .context("no pixmap format for the root depth")?;
            let layout = PixelLayout {
                lsb_first: setup.image_byte_order() == x::ImageOrder::LsbFirst,
                depth,
                bits_per_pixel: format.bits_per_pixel(),
                red_mask: visual.red_mask(),
                green_mask: visual.green_mask(),
                blue_mask: visual.blue_mask(),
            };
            (
                screen.root(),
                screen.width_in_pixels(),
                screen.height_in_pixels(),
                layout,
            )
        };
        if let Err(e) = layout.check_bgrx() {
            tracing::warn!("X11 pixel layout unsupported, frames will fail: {}", e);
        }

        // XFixes answers nothing until the client has announced its version
        let xfixes = conn
            .active_extensions()
            .any(|ext| ext == xcb::Extension::XFixes)
            && conn
                .wait_for_reply(conn.send_request(&xfixes::QueryVersion {
                    client_major_version: 4,
                    client_minor_version: 0,
                }))
                .is_ok();

        tracing::info!(
            "X11 screen capture initialized: {}x{} on screen {} (cursor overlay: {})",
            screen_width,
            screen_height,
            screen_num,
            if xfixes { "xfixes" } else { "unavailable" }
        );

        Ok(Self {
            conn,
            root,
            screen_width,
            screen_height,
            layout,
            xfixes,
        })
    }

    fn cursor_sprite(&self) -> xcb::Result<CursorSprite> {
        let reply = self
            .conn
            .wait_for_reply(self.conn.send_request(&xfixes::GetCursorImage {}))?;
        Ok(CursorSprite {
            x: reply.x() as i32 - reply.xhot() as i32,
            y: reply.y() as i32 - reply.yhot() as i32,
            width: reply.width() as u32,
            height: reply.height() as u32,
            argb: reply.cursor_image().to_vec(),
        })
    }
}

impl CursorLocator for X11ScreenCapture {
    fn cursor_position(&self) -> Result<CursorPosition, CaptureError> {
        let reply = self
            .conn
            .wait_for_reply(self.conn.send_request(&x::QueryPointer { window: self.root }))
            .map_err(|e| CaptureError::Acquisition(format!("QueryPointer: {}", e)))?;
        Ok(CursorPosition {
            x: reply.root_x() as i32,
            y: reply.root_y() as i32,
        })
    }
}

impl FrameCapturer for X11ScreenCapture {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn capture(&self, width: u32, height: u32) -> Result<Box<dyn ScreenSnapshot>, CaptureError> {
        if width > self.screen_width as u32 || height > self.screen_height as u32 {
            return Err(CaptureError::BlockCopy(format!(
                "requested {}x{} exceeds the {}x{} screen",
                width, height, self.screen_width, self.screen_height
            )));
        }

        self.layout
            .check_bgrx()
            .map_err(CaptureError::Extraction)?;

        let reply = self
            .conn
            .wait_for_reply(self.conn.send_request(&x::GetImage {
                format: x::ImageFormat::ZPixmap,
                drawable: x::Drawable::Window(self.root),
                x: 0,
                y: 0,
                width: width as u16,
                height: height as u16,
                plane_mask: u32::MAX,
            }))
            .map_err(|e| CaptureError::BlockCopy(format!("GetImage: {}", e)))?;

        let expected = width as usize * height as usize * 4;
        let data = reply.data();
        if data.len() < expected {
            return Err(CaptureError::Extraction(format!(
                "GetImage returned {} bytes for {}x{} at depth {}, expected 32-bit pixels",
                data.len(),
                width,
                height,
                reply.depth()
            )));
        }

        let mut frame = Vec::new();
        frame
            .try_reserve_exact(expected)
            .map_err(|_| CaptureError::Allocation(format!("{} byte frame copy", expected)))?;
        frame.extend_from_slice(&data[..expected]);

        if self.xfixes {
            match self.cursor_sprite() {
                Ok(sprite) => pixels::composite_cursor(&mut frame, width, height, &sprite),
                Err(e) => debug!("cursor image unavailable: {}", e),
            }
        }

        Ok(Box::new(X11Snapshot {
            width,
            height,
            bits_per_pixel: self.layout.bits_per_pixel,
            pixels: frame,
        }))
    }
}
