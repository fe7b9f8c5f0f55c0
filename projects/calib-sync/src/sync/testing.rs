// Fake video collaborators for finder tests.
//
// Frames are 1x1 single-channel Mats holding their own frame index, so fake
// detectors can decide per frame without any real decoding.

use crate::sources::VideoSource;
use crate::video::{BoardDims, VideoReader};
use anyhow::{anyhow, Result};
use opencv::core::{Mat, Scalar, CV_32SC1};
use opencv::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct FakeReader {
    pub frame_count: usize,
    pub fps: f64,
    position: usize,
    /// Frame whose decode fails
    fail_at: Option<usize>,
    log: Arc<Mutex<Vec<(String, usize)>>>,
    name: String,
}

impl VideoReader for FakeReader {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.frame_count)
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.fps)
    }

    fn seek_to_frame(&mut self, frame_num: usize) -> Result<()> {
        if frame_num >= self.frame_count {
            return Err(anyhow!("seek past end: {}", frame_num));
        }
        self.position = frame_num;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Mat> {
        if self.position >= self.frame_count {
            return Err(anyhow!("End of stream"));
        }
        if self.fail_at == Some(self.position) {
            return Err(anyhow!("corrupt packet at frame {}", self.position));
        }
        let frame = indexed_frame(self.position)?;
        self.log
            .lock()
            .map_err(|_| anyhow!("Mutex poisoned"))?
            .push((self.name.clone(), self.position));
        self.position += 1;
        Ok(frame)
    }
}

pub fn indexed_frame(index: usize) -> Result<Mat> {
    Ok(Mat::new_rows_cols_with_default(
        1,
        1,
        CV_32SC1,
        Scalar::all(index as f64),
    )?)
}

pub fn frame_index(frame: &Mat) -> Result<usize> {
    Ok(*frame.at_2d::<i32>(0, 0)? as usize)
}

/// Opener over a fixed set of fake videos keyed by file name, recording
/// every decoded `(name, frame)` and every open.
#[derive(Default)]
pub struct FakeLibrary {
    videos: HashMap<String, (usize, f64)>,
    failures: HashMap<String, usize>,
    pub decoded: Arc<Mutex<Vec<(String, usize)>>>,
    pub opened: Arc<Mutex<Vec<String>>>,
}

impl FakeLibrary {
    pub fn with_video(mut self, name: &str, frame_count: usize, fps: f64) -> Self {
        self.videos.insert(name.to_string(), (frame_count, fps));
        self
    }

    /// Makes decoding `frame` of `name` fail.
    pub fn failing_on(mut self, name: &str, frame: usize) -> Self {
        self.failures.insert(name.to_string(), frame);
        self
    }

    pub fn sources(&self, names: &[&str]) -> Vec<VideoSource> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| VideoSource::new(i, format!("/videos/{}", name)))
            .collect()
    }

    pub fn decoded_frames(&self, name: &str) -> Vec<usize> {
        self.decoded
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, f)| *f)
            .collect()
    }
}

impl crate::video::VideoOpener for FakeLibrary {
    fn open(&self, source: &VideoSource) -> Result<Box<dyn VideoReader>> {
        let (frame_count, fps) = self
            .videos
            .get(&source.name)
            .copied()
            .ok_or_else(|| anyhow!("Video file not found: {}", source.path.display()))?;
        self.opened
            .lock()
            .map_err(|_| anyhow!("Mutex poisoned"))?
            .push(source.name.clone());
        Ok(Box::new(FakeReader {
            frame_count,
            fps,
            position: 0,
            fail_at: self.failures.get(&source.name).copied(),
            log: self.decoded.clone(),
            name: source.name.clone(),
        }))
    }
}

/// Detector that sees the board only on the listed frames of each video.
/// Frames carry no name, so hits apply across all videos.
pub fn detector_hitting(frames: &[usize]) -> impl Fn(&Mat, BoardDims) -> Result<bool> + Sync {
    let hits = frames.to_vec();
    move |frame: &Mat, _board: BoardDims| Ok(hits.contains(&frame_index(frame)?))
}

/// Detector that sees the board on every frame inside `[from, to]`.
pub fn detector_between(from: usize, to: usize) -> impl Fn(&Mat, BoardDims) -> Result<bool> + Sync {
    move |frame: &Mat, _board: BoardDims| {
        let index = frame_index(frame)?;
        Ok(index >= from && index <= to)
    }
}
