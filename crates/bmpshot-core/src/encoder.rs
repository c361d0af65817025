//! Snapshot to `.bmp` file: pixel extraction, header construction and file output.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, warn};

use bmpshot_platform::screen::{CaptureError, CursorLocator, CursorPosition, ScreenSnapshot};

use crate::bitmap::{self, BitmapError, BitmapFileHeader, BitmapInfoHeader};

/// Category of a per-frame failure, as shown in the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameErrorKind {
    AcquisitionFailure,
    AllocationFailure,
    ExtractionFailure,
    FileCreateFailure,
    PartialWriteFailure,
    WorkerAborted,
}

impl fmt::Display for FrameErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AcquisitionFailure => "acquisition failure",
            Self::AllocationFailure => "allocation failure",
            Self::ExtractionFailure => "extraction failure",
            Self::FileCreateFailure => "file create failure",
            Self::PartialWriteFailure => "partial write failure",
            Self::WorkerAborted => "worker aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("snapshot is {actual_width}x{actual_height}, expected {width}x{height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error(transparent)]
    Layout(#[from] BitmapError),
    #[error("cannot allocate {0} byte pixel buffer")]
    Allocation(usize),
    #[error("extracted {rows} of {expected} rows")]
    ShortExtraction { rows: u32, expected: u32 },
    #[error("cannot create {}: {source}", .path.display())]
    FileCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("incomplete write to {}: {source}", .path.display())]
    PartialWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("worker stopped before reporting this frame")]
    WorkerAborted,
}

impl FrameError {
    pub fn kind(&self) -> FrameErrorKind {
        match self {
            Self::Capture(CaptureError::Acquisition(_) | CaptureError::BlockCopy(_)) => {
                FrameErrorKind::AcquisitionFailure
            }
            Self::Capture(CaptureError::Allocation(_)) | Self::Allocation(_) | Self::Layout(_) => {
                FrameErrorKind::AllocationFailure
            }
            Self::Capture(CaptureError::Extraction(_))
            | Self::GeometryMismatch { .. }
            | Self::ShortExtraction { .. } => FrameErrorKind::ExtractionFailure,
            Self::FileCreate { .. } => FrameErrorKind::FileCreateFailure,
            Self::PartialWrite { .. } => FrameErrorKind::PartialWriteFailure,
            Self::WorkerAborted => FrameErrorKind::WorkerAborted,
        }
    }
}

/// Wall-clock source for file name timestamps
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// What a frame's file name is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub index: u32,
    pub cursor: CursorPosition,
    pub timestamp_ms: u64,
}

impl FrameMetadata {
    /// `{index}+{x}_{y}_{timestamp}.bmp`
    pub fn file_name(&self) -> String {
        format!(
            "{}+{}_{}_{}.bmp",
            self.index, self.cursor.x, self.cursor.y, self.timestamp_ms
        )
    }
}

/// A frame that made it to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFrame {
    pub metadata: FrameMetadata,
    pub path: PathBuf,
}

pub struct BitmapEncoder {
    output_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl BitmapEncoder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `snapshot` as frame `frame_index`.
    ///
    /// The snapshot must be exactly `width` x `height`. Cursor position and
    /// timestamp are sampled after the pixels have been read, so they can be
    /// slightly out of step with the image content.
    pub fn encode_and_save<C>(
        &self,
        snapshot: Box<dyn ScreenSnapshot>,
        width: u32,
        height: u32,
        frame_index: u32,
        cursor: &C,
    ) -> Result<SavedFrame, FrameError>
    where
        C: CursorLocator + ?Sized,
    {
        let geometry = snapshot.geometry()?;
        if geometry.width != width || geometry.height != height {
            return Err(FrameError::GeometryMismatch {
                width,
                height,
                actual_width: geometry.width,
                actual_height: geometry.height,
            });
        }

        let (file_header, info_header) = bitmap::headers_for(width, height)?;
        let mut pixels = zeroed_buffer(info_header.image_size as usize)?;

        let rows = snapshot.read_bgr24(&mut pixels, bitmap::padded_row_bytes(width))?;
        if rows < height {
            return Err(FrameError::ShortExtraction {
                rows,
                expected: height,
            });
        }
        debug!(
            "frame {}: extracted {} rows from {} bpp surface",
            frame_index, rows, geometry.bits_per_pixel
        );
        drop(snapshot);

        let metadata = FrameMetadata {
            index: frame_index,
            cursor: cursor.cursor_position()?,
            timestamp_ms: self.clock.now_millis(),
        };
        let path = self.output_dir.join(metadata.file_name());

        write_bitmap(&path, &file_header, &info_header, &pixels)?;
        Ok(SavedFrame { metadata, path })
    }
}

fn zeroed_buffer(len: usize) -> Result<Vec<u8>, FrameError> {
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(len)
        .map_err(|_| FrameError::Allocation(len))?;
    pixels.resize(len, 0);
    Ok(pixels)
}

/// Create (or truncate) `path` and write headers followed by pixel rows.
///
/// A file that could not be written completely is removed again.
pub fn write_bitmap(
    path: &Path,
    file_header: &BitmapFileHeader,
    info_header: &BitmapInfoHeader,
    pixels: &[u8],
) -> Result<(), FrameError> {
    let mut file = File::create(path).map_err(|source| FrameError::FileCreate {
        path: path.to_path_buf(),
        source,
    })?;

    let written = file
        .write_all(&file_header.encode())
        .and_then(|_| file.write_all(&info_header.encode()))
        .and_then(|_| file.write_all(pixels))
        .and_then(|_| file.flush());

    if let Err(source) = written {
        drop(file);
        if let Err(e) = fs::remove_file(path) {
            warn!("failed to remove truncated {}: {}", path.display(), e);
        }
        return Err(FrameError::PartialWrite {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}
