//! Conversions from X11 Z-pixmap data to bitmap rows.

/// ARGB cursor sprite positioned in screen coordinates (top-left corner,
/// hotspot already subtracted). Colour channels are premultiplied by alpha.
#[derive(Debug, Clone)]
pub struct CursorSprite {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub argb: Vec<u32>,
}

/// How the X server lays out root-window pixels in Z-pixmap images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub lsb_first: bool,
    pub depth: u8,
    pub bits_per_pixel: u8,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

impl PixelLayout {
    /// Ok if every pixel is four bytes in B, G, R, X order.
    pub fn check_bgrx(&self) -> Result<(), String> {
        if !self.lsb_first {
            return Err("MSB-first image byte order is not supported".into());
        }
        if self.bits_per_pixel != 32 {
            return Err(format!(
                "{} bits per pixel at depth {} is not supported",
                self.bits_per_pixel, self.depth
            ));
        }
        if (self.red_mask, self.green_mask, self.blue_mask) != (0xff_0000, 0xff00, 0xff) {
            return Err(format!(
                "channel masks r={:#x} g={:#x} b={:#x} are not 8-bit BGRX",
                self.red_mask, self.green_mask, self.blue_mask
            ));
        }
        Ok(())
    }
}

/// Copy top-down 32-bit BGRX rows into bottom-up 24-bit BGR rows of `stride`
/// bytes. Returns the number of rows copied.
pub fn bgrx_to_bottom_up_bgr24(
    src: &[u8],
    width: u32,
    height: u32,
    dst: &mut [u8],
    stride: usize,
) -> u32 {
    let src_stride = width as usize * 4;
    if src_stride == 0 {
        return 0;
    }
    let rows = (src.len() / src_stride)
        .min(height as usize)
        .min(dst.len() / stride.max(1));

    for (y, src_row) in src.chunks_exact(src_stride).take(rows).enumerate() {
        let scan_line = height as usize - 1 - y;
        let start = scan_line * stride;
        let dst_row = &mut dst[start..start + width as usize * 3];
        for (out, px) in dst_row.chunks_exact_mut(3).zip(src_row.chunks_exact(4)) {
            out.copy_from_slice(&px[..3]);
        }
    }
    rows as u32
}

/// Blend `sprite` over a top-down BGRX frame.
pub fn composite_cursor(frame: &mut [u8], width: u32, height: u32, sprite: &CursorSprite) {
    for sy in 0..sprite.height as i32 {
        let fy = sprite.y + sy;
        if fy < 0 || fy >= height as i32 {
            continue;
        }
        for sx in 0..sprite.width as i32 {
            let fx = sprite.x + sx;
            if fx < 0 || fx >= width as i32 {
                continue;
            }
            let Some(&argb) = sprite.argb.get((sy * sprite.width as i32 + sx) as usize) else {
                return;
            };
            let alpha = argb >> 24;
            if alpha == 0 {
                continue;
            }
            let offset = (fy as usize * width as usize + fx as usize) * 4;
            let Some(px) = frame.get_mut(offset..offset + 3) else {
                return;
            };
            let src = [argb & 0xff, (argb >> 8) & 0xff, (argb >> 16) & 0xff];
            for (channel, value) in px.iter_mut().zip(src) {
                let under = *channel as u32 * (255 - alpha) / 255;
                *channel = (value + under).min(255) as u8;
            }
        }
    }
}
