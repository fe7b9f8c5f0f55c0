use super::VideoReader;
use anyhow::{anyhow, Result};
use opencv::{
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_HW_ACCELERATION,
        CAP_PROP_POS_FRAMES, VIDEO_ACCELERATION_ANY,
    },
};

/// Video reader backed by OpenCV's `VideoCapture`.
pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
    total_frames: usize,
}

impl OpencvReader {
    pub fn new(path: &str) -> Result<Self> {
        let mut capture = VideoCapture::from_file(path, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(anyhow!("Failed to open video file: {}", path));
        }

        // Try to enable hardware acceleration (VideoToolbox on macOS, VA-API on Linux, etc.)
        match capture.set(CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY as f64) {
            Ok(true) => tracing::debug!("OpencvReader: hardware acceleration enabled"),
            _ => tracing::debug!("OpencvReader: hardware acceleration not available"),
        }

        let fps = capture.get(CAP_PROP_FPS)?;
        if fps <= 0.0 || !fps.is_finite() {
            return Err(anyhow!("Could not determine frame rate of {}", path));
        }
        let total_frames = capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;
        if total_frames == 0 {
            return Err(anyhow!("Could not determine frame count of {}", path));
        }

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, stream_frames={}",
            path,
            total_frames as f64 / fps,
            fps,
            total_frames
        );

        Ok(Self {
            capture,
            source_fps: fps,
            total_frames,
        })
    }
}

impl VideoReader for OpencvReader {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.total_frames)
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.source_fps)
    }

    fn seek_to_frame(&mut self, frame_num: usize) -> Result<()> {
        if frame_num >= self.total_frames {
            return Err(anyhow!(
                "Frame {} is past the end of the video ({} frames)",
                frame_num,
                self.total_frames
            ));
        }
        self.capture.set(CAP_PROP_POS_FRAMES, frame_num as f64)?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            return Err(anyhow!("Failed to read frame"));
        }

        Ok(frame)
    }
}
