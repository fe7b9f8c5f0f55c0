// Calibration range finder: scans each video for the first and last frames
// showing the calibration board, then synchronizes those bounds.

use crate::error::{ScanDirection, SyncError};
use crate::sources::VideoSource;
use crate::sync::observer::{SearchEvent, SearchObserver};
use crate::sync::synchronizer::synchronize;
use crate::sync::types::{frames_for_duration, FrameRange, StreamInfo, SyncResult};
use crate::sync::{check_duration, frame_offset, open_stream};
use crate::video::{BoardDims, PatternDetector, VideoOpener, VideoReader};
use anyhow::{anyhow, Context};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOptions {
    pub board: BoardDims,
    /// Time between sampled frames
    pub seek_interval_seconds: f64,
    /// Seconds before the end of each video where the backward scan starts
    pub end_cutoff_seconds: f64,
    /// Scan each video on its own worker thread
    pub parallel: bool,
}

impl CalibrationOptions {
    pub fn new(board: BoardDims) -> Self {
        Self {
            board,
            seek_interval_seconds: 1.0,
            end_cutoff_seconds: 20.0,
            parallel: false,
        }
    }
}

/// Outcome of scanning one video
#[derive(Debug, Clone)]
struct StreamScan {
    info: StreamInfo,
    offset: i64,
    range: FrameRange,
}

/// Finds frame and time ranges at which to clip `sources` for calibration:
/// from the first frame showing the board (at or after each video's offset)
/// to one past the last such frame before the end cutoff, synchronized
/// across all videos.
pub fn find_calibration_range<O, D, B>(
    sources: &[VideoSource],
    time_offsets: &[f64],
    opener: &O,
    detector: &D,
    options: &CalibrationOptions,
    observer: &B,
) -> Result<SyncResult, SyncError>
where
    O: VideoOpener + ?Sized,
    D: PatternDetector + ?Sized,
    B: SearchObserver + ?Sized,
{
    check_duration("seek interval", options.seek_interval_seconds)?;
    check_duration("end cutoff", options.end_cutoff_seconds)?;
    if options.board.width < 2 || options.board.height < 2 {
        return Err(SyncError::InvalidInput(format!(
            "board must have at least 2x2 inner corners, got {}x{}",
            options.board.width, options.board.height
        )));
    }

    let scans: Vec<StreamScan> = if options.parallel && sources.len() > 1 {
        scan_parallel(sources, time_offsets, opener, detector, options, observer)?
    } else {
        sources
            .iter()
            .map(|source| scan_stream(source, time_offsets, opener, detector, options, observer))
            .collect::<Result<_, _>>()?
    };

    let frame_counts: Vec<usize> = scans.iter().map(|s| s.info.frame_count).collect();
    let frame_rates: Vec<f64> = scans.iter().map(|s| s.info.fps).collect();
    let ranges: Vec<FrameRange> = scans.iter().map(|s| s.range).collect();
    let offsets: Vec<i64> = scans.iter().map(|s| s.offset).collect();

    synchronize(&frame_counts, &frame_rates, &ranges, &offsets)
}

/// Scans every video on its own scoped worker, joining in input order.
/// Each worker opens its own reader; the first error in input order wins.
fn scan_parallel<O, D, B>(
    sources: &[VideoSource],
    time_offsets: &[f64],
    opener: &O,
    detector: &D,
    options: &CalibrationOptions,
    observer: &B,
) -> Result<Vec<StreamScan>, SyncError>
where
    O: VideoOpener + ?Sized,
    D: PatternDetector + ?Sized,
    B: SearchObserver + ?Sized,
{
    let joined = crossbeam::scope(|s| {
        let handles: Vec<_> = sources
            .iter()
            .map(|source| {
                s.spawn(move |_| {
                    tracing::debug!("Spawning scan worker for {}", source.name);
                    scan_stream(source, time_offsets, opener, detector, options, observer)
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(sources)
            .map(|(handle, source)| {
                handle.join().unwrap_or_else(|_| {
                    Err(SyncError::Collaborator(anyhow!(
                        "Scan worker for {} panicked",
                        source.name
                    )))
                })
            })
            .collect::<Vec<_>>()
    })
    .map_err(|_| SyncError::Collaborator(anyhow!("Scan workers panicked")))?;

    joined.into_iter().collect()
}

fn scan_stream<O, D, B>(
    source: &VideoSource,
    time_offsets: &[f64],
    opener: &O,
    detector: &D,
    options: &CalibrationOptions,
    observer: &B,
) -> Result<StreamScan, SyncError>
where
    O: VideoOpener + ?Sized,
    D: PatternDetector + ?Sized,
    B: SearchObserver + ?Sized,
{
    // The reader stays open for both scans of this video and is released on return
    let (mut reader, info) = open_stream(opener, source)?;
    let offset = frame_offset(&info, time_offsets)?;

    let skip = frames_for_duration(info.fps, options.seek_interval_seconds);
    if skip < 1 {
        return Err(SyncError::InvalidInput(format!(
            "seek interval of {} s is shorter than one frame of {} ({:.3} fps)",
            options.seek_interval_seconds, info.name, info.fps
        )));
    }

    let mut scanner = Scanner {
        reader: reader.as_mut(),
        info: &info,
        detector,
        board: options.board,
        observer,
    };

    let start = scanner.forward(offset, skip)?;
    let cutoff = frames_for_duration(info.fps, options.end_cutoff_seconds);
    let from = (info.frame_count as i64 - 1).saturating_sub(cutoff);
    let end = scanner.backward(from, skip)?;

    tracing::info!(
        "{}: offset {} frames, calibration board visible in ({}, {})",
        info.name,
        offset,
        start,
        end
    );

    Ok(StreamScan {
        info,
        offset,
        range: FrameRange::new(start, end),
    })
}

/// Fixed-stride pattern search over one open video
struct Scanner<'a, D: ?Sized, B: ?Sized> {
    reader: &'a mut dyn VideoReader,
    info: &'a StreamInfo,
    detector: &'a D,
    board: BoardDims,
    observer: &'a B,
}

impl<D, B> Scanner<'_, D, B>
where
    D: PatternDetector + ?Sized,
    B: SearchObserver + ?Sized,
{
    /// First sampled frame at or after `from` that shows the board.
    fn forward(&mut self, from: i64, skip: i64) -> Result<i64, SyncError> {
        let direction = ScanDirection::Forward;
        let last_frame = self.info.frame_count as i64 - 1;
        let mut i = if from < 0 {
            tracing::debug!(
                "{}: negative offset {}, scanning from frame 0",
                self.info.name,
                from
            );
            0
        } else {
            from
        };
        self.started(direction, i);

        loop {
            if i > last_frame {
                return Err(self.not_found(direction));
            }
            let found = self
                .sample(direction, i)
                .map_err(|err| self.failed(direction, err))?;
            if found {
                self.finished(direction, i);
                return Ok(i);
            }
            i += skip;
        }
    }

    /// One past the last sampled frame at or before `from` that shows the board.
    fn backward(&mut self, from: i64, skip: i64) -> Result<i64, SyncError> {
        let direction = ScanDirection::Backward;
        let mut i = from;
        self.started(direction, i);

        loop {
            if i < 0 {
                return Err(self.not_found(direction));
            }
            let found = self
                .sample(direction, i)
                .map_err(|err| self.failed(direction, err))?;
            if found {
                // Exclusive right bound
                let end = i + 1;
                self.finished(direction, end);
                return Ok(end);
            }
            i -= skip;
        }
    }

    fn sample(&mut self, direction: ScanDirection, frame: i64) -> Result<bool, SyncError> {
        let name = &self.info.name;
        self.reader
            .seek_to_frame(frame as usize)
            .with_context(|| format!("Failed to seek {} to frame {}", name, frame))?;
        let mat = self
            .reader
            .read_frame()
            .with_context(|| format!("Failed to decode frame {} of {}", frame, name))?;
        let found = self
            .detector
            .detect(&mat, self.board)
            .with_context(|| format!("Pattern detection failed on frame {} of {}", frame, name))?;

        self.observer.on_event(SearchEvent::FrameSampled {
            stream: name,
            direction,
            frame,
            found,
        });
        Ok(found)
    }

    fn started(&self, direction: ScanDirection, from_frame: i64) {
        tracing::debug!("{}: {} scan from frame {}", self.info.name, direction, from_frame);
        self.observer.on_event(SearchEvent::ScanStarted {
            stream: &self.info.name,
            direction,
            from_frame,
        });
    }

    fn finished(&self, direction: ScanDirection, frame: i64) {
        self.observer.on_event(SearchEvent::ScanFinished {
            stream: &self.info.name,
            direction,
            frame,
            seconds: frame as f64 / self.info.fps,
        });
    }

    fn not_found(&self, direction: ScanDirection) -> SyncError {
        tracing::warn!(
            "{}: {} scan found no frame with the calibration board",
            self.info.name,
            direction
        );
        self.failed(
            direction,
            SyncError::PatternNotFound {
                stream: self.info.name.clone(),
                direction,
            },
        )
    }

    /// Closes the scan for observers and hands the error back.
    fn failed(&self, direction: ScanDirection, err: SyncError) -> SyncError {
        let reason = format!("{:#}", err);
        self.observer.on_event(SearchEvent::ScanFailed {
            stream: &self.info.name,
            direction,
            reason: &reason,
        });
        err
    }
}
