//! Uncompressed 24-bit bitmap layout: file header, info header and row stride.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// `BITMAPFILEHEADER` size on disk
pub const FILE_HEADER_SIZE: usize = 14;

/// `BITMAPINFOHEADER` size on disk
pub const INFO_HEADER_SIZE: usize = 40;

/// Offset from the start of the file to the first pixel byte
pub const PIXEL_DATA_OFFSET: usize = FILE_HEADER_SIZE + INFO_HEADER_SIZE;

/// "BM", read as a little-endian u16
pub const BITMAP_MAGIC: u16 = 0x4D42;

pub const BITS_PER_PIXEL: u16 = 24;

/// `BI_RGB`
pub const COMPRESSION_NONE: u32 = 0;

#[derive(Debug, Error)]
pub enum BitmapError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },
    #[error("not a bitmap file (magic 0x{0:04x})")]
    BadMagic(u16),
    #[error("image {width}x{height} does not fit a 24-bit bitmap")]
    TooLarge { width: u32, height: u32 },
}

/// Bytes per pixel row, padded up to a 4-byte boundary.
pub fn padded_row_bytes(width: u32) -> usize {
    ((width as usize * BITS_PER_PIXEL as usize + 31) / 32) * 4
}

/// Size of the pixel array for a `width` x `height` image.
pub fn pixel_buffer_size(width: u32, height: u32) -> usize {
    padded_row_bytes(width) * height as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapFileHeader {
    pub magic: u16,
    pub file_size: u32,
    pub reserved1: u16,
    pub reserved2: u16,
    pub pixel_offset: u32,
}

impl BitmapFileHeader {
    /// Header for a file whose pixel array is `pixel_bytes` long.
    pub fn for_pixel_bytes(pixel_bytes: u32) -> Self {
        Self {
            magic: BITMAP_MAGIC,
            file_size: pixel_bytes + PIXEL_DATA_OFFSET as u32,
            reserved1: 0,
            reserved2: 0,
            pixel_offset: PIXEL_DATA_OFFSET as u32,
        }
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut out = [0u8; FILE_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u16_le(self.magic);
        buf.put_u32_le(self.file_size);
        buf.put_u16_le(self.reserved1);
        buf.put_u16_le(self.reserved2);
        buf.put_u32_le(self.pixel_offset);
        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, BitmapError> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(BitmapError::TooShort {
                need: FILE_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let magic = buf.get_u16_le();
        if magic != BITMAP_MAGIC {
            return Err(BitmapError::BadMagic(magic));
        }
        Ok(Self {
            magic,
            file_size: buf.get_u32_le(),
            reserved1: buf.get_u16_le(),
            reserved2: buf.get_u16_le(),
            pixel_offset: buf.get_u32_le(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapInfoHeader {
    pub header_size: u32,
    pub width: i32,
    /// Positive: rows are stored bottom-up
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub image_size: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

impl BitmapInfoHeader {
    /// Bottom-up 24 bpp header with the image size filled in.
    pub fn bgr24(width: u32, height: u32) -> Result<Self, BitmapError> {
        let too_large = || BitmapError::TooLarge { width, height };
        let w = i32::try_from(width).map_err(|_| too_large())?;
        let h = i32::try_from(height).map_err(|_| too_large())?;
        let image_size = checked_file_size(width, height)
            .map(|total| total - PIXEL_DATA_OFFSET as u32)
            .ok_or_else(too_large)?;

        Ok(Self {
            header_size: INFO_HEADER_SIZE as u32,
            width: w,
            height: h,
            planes: 1,
            bit_count: BITS_PER_PIXEL,
            compression: COMPRESSION_NONE,
            image_size,
            x_pels_per_meter: 0,
            y_pels_per_meter: 0,
            colors_used: 0,
            colors_important: 0,
        })
    }

    pub fn encode(&self) -> [u8; INFO_HEADER_SIZE] {
        let mut out = [0u8; INFO_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.header_size);
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
        buf.put_u16_le(self.planes);
        buf.put_u16_le(self.bit_count);
        buf.put_u32_le(self.compression);
        buf.put_u32_le(self.image_size);
        buf.put_i32_le(self.x_pels_per_meter);
        buf.put_i32_le(self.y_pels_per_meter);
        buf.put_u32_le(self.colors_used);
        buf.put_u32_le(self.colors_important);
        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, BitmapError> {
        if buf.len() < INFO_HEADER_SIZE {
            return Err(BitmapError::TooShort {
                need: INFO_HEADER_SIZE,
                have: buf.len(),
            });
        }
        Ok(Self {
            header_size: buf.get_u32_le(),
            width: buf.get_i32_le(),
            height: buf.get_i32_le(),
            planes: buf.get_u16_le(),
            bit_count: buf.get_u16_le(),
            compression: buf.get_u32_le(),
            image_size: buf.get_u32_le(),
            x_pels_per_meter: buf.get_i32_le(),
            y_pels_per_meter: buf.get_i32_le(),
            colors_used: buf.get_u32_le(),
            colors_important: buf.get_u32_le(),
        })
    }

    /// Pixel array size implied by width, height and bit depth.
    pub fn derived_image_size(&self) -> usize {
        pixel_buffer_size(self.width.unsigned_abs(), self.height.unsigned_abs())
    }
}

/// Total file size, or `None` when it overflows the 32-bit `bfSize` field.
pub fn checked_file_size(width: u32, height: u32) -> Option<u32> {
    (padded_row_bytes(width) as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_add(PIXEL_DATA_OFFSET as u64))
        .and_then(|total| u32::try_from(total).ok())
}

/// Both headers for a bottom-up 24 bpp image.
pub fn headers_for(
    width: u32,
    height: u32,
) -> Result<(BitmapFileHeader, BitmapInfoHeader), BitmapError> {
    let info = BitmapInfoHeader::bgr24(width, height)?;
    let file = BitmapFileHeader::for_pixel_bytes(info.image_size);
    Ok((file, info))
}
