// Offset synchronization of frame ranges across cameras

pub mod audio_offset;
pub mod calibration;
pub mod observer;
pub mod offset;
pub mod synchronizer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::SyncError;
use crate::sources::VideoSource;
use crate::video::{VideoOpener, VideoReader};
use anyhow::Context;
use types::{frames_for_duration, StreamInfo};

/// Opens a source and reads the metadata the range computations need.
pub(crate) fn open_stream<O>(
    opener: &O,
    source: &VideoSource,
) -> Result<(Box<dyn VideoReader>, StreamInfo), SyncError>
where
    O: VideoOpener + ?Sized,
{
    let reader = opener
        .open(source)
        .with_context(|| format!("Failed to open {}", source.path.display()))?;
    let frame_count = reader
        .frame_count()
        .with_context(|| format!("Failed to read frame count of {}", source.name))?;
    let fps = reader
        .source_fps()
        .with_context(|| format!("Failed to read frame rate of {}", source.name))?;

    if frame_count == 0 {
        return Err(SyncError::InvalidInput(format!("{} has no frames", source.name)));
    }
    if !fps.is_finite() || fps <= 0.0 {
        return Err(SyncError::InvalidInput(format!(
            "{} has invalid frame rate {}",
            source.name, fps
        )));
    }

    let info = StreamInfo {
        index: source.index,
        name: source.name.clone(),
        frame_count,
        fps,
    };
    Ok((reader, info))
}

/// Largest frame offset accepted, leaving headroom for range arithmetic.
const MAX_OFFSET_FRAMES: u64 = (i64::MAX / 2) as u64;

/// Frame offset of a stream: its time offset truncated to whole frames.
pub(crate) fn frame_offset(info: &StreamInfo, time_offsets: &[f64]) -> Result<i64, SyncError> {
    let seconds = time_offsets.get(info.index).copied().ok_or_else(|| {
        SyncError::InvalidInput(format!(
            "no time offset for {} (index {}, {} offsets given)",
            info.name,
            info.index,
            time_offsets.len()
        ))
    })?;
    if !seconds.is_finite() {
        return Err(SyncError::InvalidInput(format!(
            "time offset of {} is not finite",
            info.name
        )));
    }
    let frames = frames_for_duration(info.fps, seconds);
    if frames.unsigned_abs() > MAX_OFFSET_FRAMES {
        return Err(SyncError::InvalidInput(format!(
            "time offset of {} ({} s) is out of range",
            info.name, seconds
        )));
    }
    Ok(frames)
}

pub(crate) fn check_duration(name: &str, seconds: f64) -> Result<(), SyncError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(SyncError::InvalidInput(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, seconds
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(fps: f64) -> StreamInfo {
        StreamInfo {
            index: 0,
            name: "cam0.mp4".to_string(),
            frame_count: 300,
            fps,
        }
    }

    #[test]
    fn test_frame_offset_truncates() {
        assert_eq!(frame_offset(&info(30.0), &[0.35]).unwrap(), 10);
        assert_eq!(frame_offset(&info(30.0), &[-0.35]).unwrap(), -10);
    }

    #[test]
    fn test_frame_offset_rejects_extreme_offsets() {
        for seconds in [-4.0e17, 4.0e17, f64::INFINITY] {
            assert!(matches!(
                frame_offset(&info(30.0), &[seconds]),
                Err(SyncError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_frame_offset_requires_an_entry() {
        assert!(matches!(
            frame_offset(&info(30.0), &[]),
            Err(SyncError::InvalidInput(_))
        ));
    }
}
