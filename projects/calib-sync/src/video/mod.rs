pub mod chessboard;
pub mod ffmpeg_reader;
pub mod opencv_reader;

use crate::sources::VideoSource;
use anyhow::{Context, Result};
use opencv::core::Mat;

/// Random-access frame source for a single video file.
///
/// A reader is released by dropping it.
pub trait VideoReader: Send {
    fn frame_count(&self) -> Result<usize>;
    fn source_fps(&self) -> Result<f64>;
    fn seek_to_frame(&mut self, frame_num: usize) -> Result<()>;
    /// Decodes the frame at the current position and advances past it.
    fn read_frame(&mut self) -> Result<Mat>;
}

/// Opens readers for video sources.
pub trait VideoOpener: Sync {
    fn open(&self, source: &VideoSource) -> Result<Box<dyn VideoReader>>;
}

/// Blanket implementation so any closure with the right signature
/// can open readers, which keeps fakes in tests short.
impl<F> VideoOpener for F
where
    F: Fn(&VideoSource) -> Result<Box<dyn VideoReader>> + Sync,
{
    fn open(&self, source: &VideoSource) -> Result<Box<dyn VideoReader>> {
        self(source)
    }
}

/// Inner-corner layout of a calibration board (columns x rows)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BoardDims {
    pub width: i32,
    pub height: i32,
}

impl BoardDims {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// Reports whether a calibration pattern is visible in a frame.
pub trait PatternDetector: Sync {
    fn detect(&self, frame: &Mat, board: BoardDims) -> Result<bool>;
}

impl<F> PatternDetector for F
where
    F: Fn(&Mat, BoardDims) -> Result<bool> + Sync,
{
    fn detect(&self, frame: &Mat, board: BoardDims) -> Result<bool> {
        self(frame, board)
    }
}

/// Decoding backend used to open videos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    #[default]
    Opencv,
    Ffmpeg,
}

impl VideoOpener for Backend {
    fn open(&self, source: &VideoSource) -> Result<Box<dyn VideoReader>> {
        let path = source.path.to_string_lossy();
        let reader: Box<dyn VideoReader> = match self {
            Backend::Ffmpeg => Box::new(
                ffmpeg_reader::FfmpegReader::new(&path)
                    .with_context(|| format!("Failed to open video with ffmpeg at: '{}'", path))?,
            ),
            Backend::Opencv => Box::new(
                opencv_reader::OpencvReader::new(&path)
                    .with_context(|| format!("Failed to open video at: '{}'", path))?,
            ),
        };
        Ok(reader)
    }
}
