//! Capture run: fans frame indices out to a fixed pool of blocking workers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use bmpshot_platform::screen::FrameCapturer;

use crate::config::{CaptureConfig, ConfigError};
use crate::encoder::{BitmapEncoder, FrameError, FrameErrorKind, SavedFrame};

/// One frame that did not make it to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    pub index: u32,
    pub kind: FrameErrorKind,
    pub message: String,
}

impl FrameFailure {
    fn new(index: u32, err: &FrameError) -> Self {
        Self {
            index,
            kind: err.kind(),
            message: format!("{:#}", err),
        }
    }
}

/// Outcome of a whole capture run, sorted by frame index
#[derive(Debug)]
pub struct RunReport {
    pub frame_count: u32,
    pub saved: Vec<SavedFrame>,
    pub failures: Vec<FrameFailure>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Capture frame `index` and write it to disk.
pub fn capture_frame(
    capturer: &dyn FrameCapturer,
    encoder: &BitmapEncoder,
    width: u32,
    height: u32,
    index: u32,
) -> Result<SavedFrame, FrameError> {
    let snapshot = capturer.capture(width, height)?;
    encoder.encode_and_save(snapshot, width, height, index, capturer)
}

pub struct Driver {
    config: CaptureConfig,
    capturer: Arc<dyn FrameCapturer>,
    encoder: Arc<BitmapEncoder>,
}

impl Driver {
    pub fn new(config: CaptureConfig, capturer: Arc<dyn FrameCapturer>) -> Result<Self, ConfigError> {
        config.validate()?;
        let encoder = Arc::new(BitmapEncoder::new(config.output_dir.clone()));
        Ok(Self {
            config,
            capturer,
            encoder,
        })
    }

    pub fn with_encoder(mut self, encoder: BitmapEncoder) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    /// Capture every configured frame and wait for all of them.
    ///
    /// Frame failures are collected in the report; they never stop the
    /// remaining frames.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let frame_count = self.config.frame_count;
        let (width, height) = (self.config.width, self.config.height);
        let workers = self.config.worker_count.min(frame_count as usize);

        info!(
            "capturing {} frames of {}x{} with {} workers ({} backend) into {}",
            frame_count,
            width,
            height,
            workers,
            self.capturer.name(),
            self.encoder.output_dir().display()
        );

        let next_index = Arc::new(AtomicU32::new(0));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let mut pool = JoinSet::new();

        for worker in 0..workers {
            let capturer = Arc::clone(&self.capturer);
            let encoder = Arc::clone(&self.encoder);
            let next_index = Arc::clone(&next_index);
            let outcome_tx = outcome_tx.clone();

            pool.spawn_blocking(move || loop {
                // never advances past frame_count, so the counter cannot wrap
                let Ok(index) = next_index.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| {
                    (i < frame_count).then_some(i + 1)
                }) else {
                    debug!("worker {} done", worker);
                    break;
                };
                let outcome = capture_frame(capturer.as_ref(), &encoder, width, height, index);
                match &outcome {
                    Ok(saved) => debug!("frame {} saved to {}", index, saved.path.display()),
                    Err(e) => warn!("frame {} failed ({}): {:#}", index, e.kind(), e),
                }
                if outcome_tx.send((index, outcome)).is_err() {
                    break;
                }
            });
        }
        drop(outcome_tx);

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!("capture worker aborted: {}", e);
            }
        }

        let mut reported = vec![false; frame_count as usize];
        let mut saved = Vec::new();
        let mut failures = Vec::new();
        while let Ok((index, outcome)) = outcome_rx.try_recv() {
            reported[index as usize] = true;
            match outcome {
                Ok(frame) => saved.push(frame),
                Err(e) => failures.push(FrameFailure::new(index, &e)),
            }
        }
        for (index, _) in reported.iter().enumerate().filter(|(_, done)| !**done) {
            failures.push(FrameFailure::new(index as u32, &FrameError::WorkerAborted));
        }

        saved.sort_by_key(|frame| frame.metadata.index);
        failures.sort_by_key(|failure| failure.index);

        let report = RunReport {
            frame_count,
            saved,
            failures,
            elapsed: started.elapsed(),
        };
        info!(
            "{} of {} frames saved in {} ms",
            report.saved.len(),
            frame_count,
            report.elapsed.as_millis()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{self, BitmapFileHeader, BitmapInfoHeader};
    use crate::testing::{solid_red, FixedClock, NoDisplay, StepClock, SyntheticCapturer};
    use bmpshot_platform::screen::CursorPosition;
    use std::path::Path;

    const CURSOR: CursorPosition = CursorPosition { x: 100, y: 200 };

    fn config(dir: &Path, frame_count: u32, worker_count: usize) -> CaptureConfig {
        CaptureConfig {
            width: 9,
            height: 4,
            frame_count,
            worker_count,
            output_dir: dir.to_path_buf(),
        }
    }

    fn bmp_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_file())
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".bmp"))
            .collect();
        names.sort();
        names
    }

    fn assert_valid_bitmap(path: &Path, width: u32, height: u32) {
        let bytes = std::fs::read(path).unwrap();
        let file = BitmapFileHeader::decode(&bytes).unwrap();
        let info = BitmapInfoHeader::decode(&bytes[bitmap::FILE_HEADER_SIZE..]).unwrap();
        assert_eq!(file.pixel_offset, 54);
        assert_eq!(file.file_size as usize, bytes.len());
        assert_eq!((info.width, info.height), (width as i32, height as i32));
        let decoded = image::open(path).unwrap().to_rgb8();
        assert!(decoded.pixels().all(|p| p.0 == [255, 0, 0]));
    }

    #[tokio::test]
    async fn test_ten_frames_two_workers() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(solid_red, CURSOR));
        let driver = Driver::new(config(dir.path(), 10, 2), capturer.clone())
            .unwrap()
            .with_encoder(
                BitmapEncoder::new(dir.path())
                    .with_clock(Arc::new(StepClock::starting_at(1_700_000_000_000))),
            );

        let report = driver.run().await;

        assert!(report.is_success());
        assert_eq!(capturer.captures.load(Ordering::SeqCst), 10);
        let indices: Vec<u32> = report.saved.iter().map(|f| f.metadata.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());

        let files = bmp_files(dir.path());
        assert_eq!(files.len(), 10);
        for index in 0..10 {
            let prefix = format!("{}+100_200_", index);
            assert_eq!(files.iter().filter(|n| n.starts_with(&prefix)).count(), 1);
        }
        for frame in &report.saved {
            assert_valid_bitmap(&frame.path, 9, 4);
        }
    }

    #[tokio::test]
    async fn test_failed_frame_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        // a directory squatting on frame 3's file name makes its create fail
        std::fs::create_dir(dir.path().join("3+100_200_1234567890123.bmp")).unwrap();

        let capturer = Arc::new(SyntheticCapturer::new(solid_red, CURSOR));
        let driver = Driver::new(config(dir.path(), 10, 2), capturer)
            .unwrap()
            .with_encoder(
                BitmapEncoder::new(dir.path()).with_clock(Arc::new(FixedClock(1234567890123))),
            );

        let report = driver.run().await;

        assert!(!report.is_success());
        assert_eq!(report.saved.len(), 9);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 3);
        assert_eq!(report.failures[0].kind, FrameErrorKind::FileCreateFailure);
        assert!(report.failures[0].message.contains("3+100_200_1234567890123.bmp"));

        let files = bmp_files(dir.path());
        assert_eq!(files.len(), 9);
        assert!(!files.iter().any(|n| n.starts_with("3+")));
        for frame in &report.saved {
            assert_valid_bitmap(&frame.path, 9, 4);
        }
    }

    #[tokio::test]
    async fn test_every_frame_reported_when_display_missing() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::new(config(dir.path(), 4, 2), Arc::new(NoDisplay)).unwrap();

        let report = driver.run().await;

        assert!(report.saved.is_empty());
        let indices: Vec<u32> = report.failures.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(report
            .failures
            .iter()
            .all(|f| f.kind == FrameErrorKind::AcquisitionFailure));
        assert!(bmp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_surface_fails_each_frame() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = SyntheticCapturer {
            surface_size: Some((8, 4)),
            ..SyntheticCapturer::new(solid_red, CURSOR)
        };
        let driver = Driver::new(config(dir.path(), 3, 2), Arc::new(capturer)).unwrap();

        let report = driver.run().await;

        assert_eq!(report.failures.len(), 3);
        assert!(report
            .failures
            .iter()
            .all(|f| f.kind == FrameErrorKind::ExtractionFailure));
    }

    #[tokio::test]
    async fn test_more_workers_than_frames() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(solid_red, CURSOR));
        let driver = Driver::new(config(dir.path(), 3, 8), capturer)
            .unwrap()
            .with_encoder(
                BitmapEncoder::new(dir.path()).with_clock(Arc::new(StepClock::starting_at(0))),
            );

        let report = driver.run().await;

        assert!(report.is_success());
        assert_eq!(report.frame_count, 3);
        assert_eq!(bmp_files(dir.path()).len(), 3);
    }

    #[tokio::test]
    async fn test_zero_frames() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(solid_red, CURSOR));
        let report = Driver::new(config(dir.path(), 0, 2), capturer.clone())
            .unwrap()
            .run()
            .await;

        assert!(report.is_success());
        assert!(report.saved.is_empty());
        assert_eq!(capturer.captures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unbounded_frame_count_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(solid_red, CURSOR));
        assert!(matches!(
            Driver::new(config(dir.path(), u32::MAX, 2), capturer),
            Err(ConfigError::TooManyFrames(u32::MAX))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_capture() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(solid_red, CURSOR));
        let mut bad = config(dir.path(), 1, 1);
        bad.width = 0;
        assert!(matches!(
            Driver::new(bad, capturer),
            Err(ConfigError::EmptyRectangle { .. })
        ));
    }
}
